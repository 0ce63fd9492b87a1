//! Tenant discovery
//!
//! Other services ask "which tenant does this deployment serve?" by
//! publishing to the discovery routing key. The listener answers each
//! request with an `org.created` envelope describing the deployment's
//! organization.
//!
//! The listener is a single supervised task:
//!
//! ```text
//! STOPPED --start--> CONNECTING --declared--> CONSUMING
//!                        ^                       |
//!                        |                  connection lost
//!                        +---- backoff <---------+
//! ```
//!
//! [`ListenerGuard`] makes starting idempotent per process.

use console_org::OrganizationStore;
use console_tenant::{TenantInfo, TenantProvisioner};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::{BackoffPolicy, RestartPolicy};
use crate::broker::{
    Broker, BrokerChannel, BrokerError, BrokerResult, Delivery, MessageProperties,
    DEFAULT_EXCHANGE,
};
use crate::config::EventsConfig;
use crate::envelope::{DiscoveryRequest, EventEnvelope, EventType, OrgCreatedPayload};
use crate::error::EventsResult;
use crate::topology::Topology;

/// Consumer tag of the discovery listener.
pub const CONSUMER_TAG: &str = "console-discovery";

/// Ensures the discovery listener starts at most once per process.
#[derive(Debug, Default)]
pub struct ListenerGuard {
    started: Mutex<bool>,
}

impl ListenerGuard {
    /// Create a guard in the not-started state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to start. Returns `true` exactly once.
    pub fn try_start(&self) -> bool {
        let mut started = self.started.lock().unwrap_or_else(|p| p.into_inner());
        if *started {
            return false;
        }
        *started = true;
        true
    }

    /// Whether a listener has been started.
    pub fn is_started(&self) -> bool {
        *self.started.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// How a discovery delivery is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Acknowledge
    Ack,
    /// Negative acknowledge, do not requeue
    Reject,
    /// Negative acknowledge and requeue
    Requeue,
}

/// Result of handling one discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// An `org.created` envelope was published
    Answered {
        /// Routing key the answer went out with
        routing_key: String,
        /// Event id of the answer
        event_id: Uuid,
    },
    /// This deployment has no organization yet
    NotConfigured,
    /// The request body was not a JSON object
    ParseError(String),
    /// The organization store failed
    LookupFailed(String),
    /// Building or publishing the answer failed
    PublishFailed(String),
}

impl DiscoveryOutcome {
    /// Settlement for this outcome.
    ///
    /// Missing tenants and malformed requests are permanent; retrying them
    /// would loop. Store and broker failures are presumed transient.
    pub fn decision(&self) -> AckDecision {
        match self {
            DiscoveryOutcome::Answered { .. } => AckDecision::Ack,
            DiscoveryOutcome::NotConfigured | DiscoveryOutcome::ParseError(_) => {
                AckDecision::Reject
            }
            DiscoveryOutcome::LookupFailed(_) | DiscoveryOutcome::PublishFailed(_) => {
                AckDecision::Requeue
            }
        }
    }
}

/// Answers discovery requests for this deployment's organization.
#[derive(Clone)]
pub struct DiscoveryHandler {
    store: Arc<dyn OrganizationStore>,
    provisioner: Arc<dyn TenantProvisioner>,
    config: EventsConfig,
}

impl DiscoveryHandler {
    /// Create a handler.
    pub fn new(
        store: Arc<dyn OrganizationStore>,
        provisioner: Arc<dyn TenantProvisioner>,
        config: EventsConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            config,
        }
    }

    /// Handle one request body, publishing the answer on `channel`.
    pub async fn respond(&self, channel: &dyn BrokerChannel, body: &[u8]) -> DiscoveryOutcome {
        let request = match DiscoveryRequest::decode(body) {
            Ok(request) => request,
            Err(e) => return DiscoveryOutcome::ParseError(e.to_string()),
        };

        let organization = match self.store.find_by_slug(&self.config.deployment_slug).await {
            Ok(Some(organization)) => organization,
            Ok(None) => return DiscoveryOutcome::NotConfigured,
            Err(e) => return DiscoveryOutcome::LookupFailed(e.to_string()),
        };

        let vhost = organization.vhost_or_empty().to_string();
        let amqp_url = self.provisioner.build_tenant_amqp_url(&vhost);
        let tenant = TenantInfo::for_slug(&organization.slug, vhost, amqp_url);

        let envelope = match OrgCreatedPayload::new(&organization, &tenant).to_payload() {
            Ok(payload) => EventEnvelope::new(EventType::OrgCreated, payload),
            Err(e) => return DiscoveryOutcome::PublishFailed(e.to_string()),
        };
        let body = match envelope.encode() {
            Ok(body) => body,
            Err(e) => return DiscoveryOutcome::PublishFailed(e.to_string()),
        };

        let (exchange, routing_key) = match request.reply_key() {
            Some(reply_to) => (DEFAULT_EXCHANGE, reply_to.to_string()),
            None => (
                self.config.events_exchange.as_str(),
                EventType::OrgCreated.as_str().to_string(),
            ),
        };

        match channel
            .publish(exchange, &routing_key, &MessageProperties::persistent_json(), &body)
            .await
        {
            Ok(()) => DiscoveryOutcome::Answered {
                routing_key,
                event_id: envelope.event_id,
            },
            Err(e) => DiscoveryOutcome::PublishFailed(e.to_string()),
        }
    }

    /// Handle a delivery and settle it exactly once.
    ///
    /// An error means the settlement itself failed and the channel is
    /// unusable; the broker requeues the delivery when the connection drops.
    pub async fn handle(
        &self,
        channel: &dyn BrokerChannel,
        delivery: &Delivery,
    ) -> BrokerResult<DiscoveryOutcome> {
        let outcome = self.respond(channel, &delivery.body).await;

        match &outcome {
            DiscoveryOutcome::Answered { routing_key, event_id } => {
                info!(routing_key = %routing_key, event_id = %event_id, "Answered discovery request");
            }
            DiscoveryOutcome::NotConfigured => {
                warn!(
                    slug = %self.config.deployment_slug,
                    "Discovery request rejected, organization not configured"
                );
            }
            DiscoveryOutcome::ParseError(reason) => {
                warn!(reason = %reason, "Discovery request rejected, malformed body");
            }
            DiscoveryOutcome::LookupFailed(reason) | DiscoveryOutcome::PublishFailed(reason) => {
                error!(
                    reason = %reason,
                    redelivered = delivery.redelivered,
                    "Discovery request failed, requeueing"
                );
            }
        }

        match outcome.decision() {
            AckDecision::Ack => channel.ack(delivery.delivery_tag).await?,
            AckDecision::Reject => channel.nack(delivery.delivery_tag, false).await?,
            AckDecision::Requeue => channel.nack(delivery.delivery_tag, true).await?,
        }
        Ok(outcome)
    }
}

/// Listener state published to [`ListenerHandle::health`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerHealth {
    /// Spawned, not yet consuming
    Starting,
    /// Consuming discovery requests
    Consuming,
    /// Waiting to reconnect after a failure
    Reconnecting {
        /// Consecutive failed attempts
        attempt: u32,
        /// Error that ended the previous attempt
        last_error: String,
    },
}

/// Supervised consumer of the discovery queue.
#[derive(Clone)]
pub struct DiscoveryListener {
    broker: Arc<dyn Broker>,
    handler: DiscoveryHandler,
    config: EventsConfig,
    policy: Arc<dyn RestartPolicy>,
}

impl DiscoveryListener {
    /// Create a listener using the configured fixed reconnect pause.
    pub fn new(broker: Arc<dyn Broker>, handler: DiscoveryHandler, config: EventsConfig) -> Self {
        let policy = Arc::new(BackoffPolicy::fixed(config.reconnect_backoff()));
        Self {
            broker,
            handler,
            config,
            policy,
        }
    }

    /// Replace the restart policy.
    pub fn with_restart_policy(mut self, policy: Arc<dyn RestartPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Spawn the supervised consume loop.
    ///
    /// Returns `None` when `guard` shows a listener was already started.
    /// The loop runs for the life of the process; it reconnects after any
    /// failure and never exits on its own.
    pub fn start(&self, guard: &ListenerGuard) -> Option<ListenerHandle> {
        if !guard.try_start() {
            debug!("Discovery listener already started");
            return None;
        }

        let (health_tx, health_rx) = watch::channel(ListenerHealth::Starting);
        let restarts = Arc::new(AtomicU64::new(0));

        let listener = self.clone();
        let counter = Arc::clone(&restarts);
        let task = tokio::spawn(async move { listener.supervise(health_tx, counter).await });

        info!(queue = %self.config.discovery_queue, "Discovery listener started");
        Some(ListenerHandle {
            task,
            health: health_rx,
            restarts,
        })
    }

    async fn supervise(self, health: watch::Sender<ListenerHealth>, restarts: Arc<AtomicU64>) {
        let health = Arc::new(health);
        let mut attempt: u32 = 0;

        loop {
            let error = self.run_session(Arc::clone(&health)).await;

            // A session that reached CONSUMING resets the failure streak.
            if *health.borrow() == ListenerHealth::Consuming {
                attempt = 0;
            }
            attempt = attempt.saturating_add(1);
            restarts.fetch_add(1, Ordering::Relaxed);

            let delay = self.policy.delay(attempt);
            error!(
                error = %error,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Discovery listener error, reconnecting"
            );
            health.send_replace(ListenerHealth::Reconnecting {
                attempt,
                last_error: error,
            });

            tokio::time::sleep(delay).await;
        }
    }

    /// Run one session on its own task, so a panic in the handler, the
    /// store or the broker ends the session and not the supervisor.
    async fn run_session(&self, health: Arc<watch::Sender<ListenerHealth>>) -> String {
        let listener = self.clone();
        let mut session = SessionTask(tokio::spawn(async move { listener.run_once(&health).await }));

        match (&mut session.0).await {
            Ok(Ok(())) => "consumer cancelled".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(e) if e.is_panic() => format!("discovery session panicked: {}", e),
            Err(e) => format!("discovery session aborted: {}", e),
        }
    }

    /// One connection lifetime: connect, redeclare, consume until the
    /// connection drops.
    pub async fn run_once(&self, health: &watch::Sender<ListenerHealth>) -> EventsResult<()> {
        let channel = self.broker.connect().await?;
        let result = self.consume(channel.as_ref(), health).await;

        if channel.is_open() {
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Failed to close discovery connection");
            }
        }
        result
    }

    async fn consume(
        &self,
        channel: &dyn BrokerChannel,
        health: &watch::Sender<ListenerHealth>,
    ) -> EventsResult<()> {
        Topology::discovery(&self.config).declare(channel).await?;
        channel.set_prefetch(1).await?;

        let mut deliveries = channel
            .consume(&self.config.discovery_queue, CONSUMER_TAG)
            .await?;
        health.send_replace(ListenerHealth::Consuming);
        info!(
            queue = %self.config.discovery_queue,
            routing_key = %self.config.discovery_routing_key,
            "Consuming discovery requests"
        );

        while let Some(delivery) = deliveries.next_delivery().await {
            let delivery = delivery?;
            self.handler.handle(channel, &delivery).await?;
        }

        Err(BrokerError::ConnectionClosed.into())
    }
}

/// Aborts the session task when the supervisor stops.
struct SessionTask(JoinHandle<EventsResult<()>>);

impl Drop for SessionTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to a running discovery listener.
#[derive(Debug)]
pub struct ListenerHandle {
    task: JoinHandle<()>,
    health: watch::Receiver<ListenerHealth>,
    restarts: Arc<AtomicU64>,
}

impl ListenerHandle {
    /// Current listener state.
    pub fn health(&self) -> ListenerHealth {
        self.health.borrow().clone()
    }

    /// Number of reconnects so far.
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Wait until the listener is consuming. Returns `false` if the task ended.
    pub async fn wait_until_consuming(&mut self) -> bool {
        loop {
            if *self.health.borrow_and_update() == ListenerHealth::Consuming {
                return true;
            }
            if self.health.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Wait for the next reconnect. Returns `false` if the task ended.
    pub async fn wait_until_reconnecting(&mut self) -> bool {
        loop {
            if matches!(*self.health.borrow_and_update(), ListenerHealth::Reconnecting { .. }) {
                return true;
            }
            if self.health.changed().await.is_err() {
                return false;
            }
        }
    }

    /// Whether the supervisor task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Abort the supervisor task.
    pub fn stop(&self) {
        self.task.abort();
    }
}
