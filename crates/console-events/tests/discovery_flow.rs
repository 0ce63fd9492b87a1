//! Discovery listener tests against the in-memory broker.

use async_trait::async_trait;
use chrono::Utc;
use console_events::{
    BackoffPolicy, Broker, DiscoveryHandler, DiscoveryListener, DiscoveryOutcome, EventEnvelope,
    EventType, EventsConfig, ListenerGuard, ListenerHealth, MemoryBroker, Settlement, Topology,
};
use console_org::{
    MemoryOrganizationStore, OrgError, OrgResult, Organization, OrganizationMembership,
    OrganizationRole, OrganizationStore, SpaceAction,
};
use console_tenant::MemoryProvisioner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

const DISCOVERY_KEY: &str = "org.discovery.request";
const WAIT: Duration = Duration::from_secs(30);

struct Fixture {
    broker: MemoryBroker,
    listener: DiscoveryListener,
}

impl Fixture {
    async fn with_org() -> Self {
        let store = MemoryOrganizationStore::new();
        let org = Organization::new(Uuid::new_v4(), "SpaceDF", "spacedf")
            .unwrap()
            .with_vhost("spacedf", Utc::now());
        store.create_with_owner(org, "owner@spacedf.io").await.unwrap();
        Self::new(Arc::new(store))
    }

    fn new(store: Arc<dyn OrganizationStore>) -> Self {
        let broker = MemoryBroker::new();
        let config = EventsConfig::default();
        let handler = DiscoveryHandler::new(store, Arc::new(MemoryProvisioner::new()), config.clone());
        let listener = DiscoveryListener::new(Arc::new(broker.clone()), handler, config);
        Self { broker, listener }
    }

    /// Declare the full topology plus a reply queue, as the rest of the
    /// platform would have.
    async fn declare_topology(&self) {
        let channel = self.broker.connect().await.unwrap();
        Topology::from_config(&EventsConfig::default())
            .declare(channel.as_ref())
            .await
            .unwrap();
        channel
            .declare_queue(&console_events::QueueSpec::durable("reply.queue"))
            .await
            .unwrap();
        channel.close().await.unwrap();
    }
}

/// Store whose every call fails, standing in for an unreachable database.
struct UnavailableStore;

#[async_trait]
impl OrganizationStore for UnavailableStore {
    async fn first(&self) -> OrgResult<Option<Organization>> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }

    async fn find_by_slug(&self, _slug: &str) -> OrgResult<Option<Organization>> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }

    async fn create_with_owner(&self, _org: Organization, _email: &str) -> OrgResult<Organization> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }

    async fn delete(&self, _id: Uuid) -> OrgResult<()> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }

    async fn adjust_total_spaces(&self, _slug: &str, _action: SpaceAction) -> OrgResult<i64> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }

    async fn roles(&self, _id: Uuid) -> OrgResult<Vec<OrganizationRole>> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }

    async fn members(&self, _id: Uuid) -> OrgResult<Vec<OrganizationMembership>> {
        Err(OrgError::Storage("database unavailable".to_string()))
    }
}

/// Store whose first lookup panics, standing in for a bug in a store
/// implementation. Later calls reach the wrapped store.
struct PanicOnceStore {
    inner: MemoryOrganizationStore,
    panicked: AtomicBool,
}

impl PanicOnceStore {
    fn new(inner: MemoryOrganizationStore) -> Self {
        Self {
            inner,
            panicked: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl OrganizationStore for PanicOnceStore {
    async fn first(&self) -> OrgResult<Option<Organization>> {
        self.inner.first().await
    }

    async fn find_by_slug(&self, slug: &str) -> OrgResult<Option<Organization>> {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("organization lookup bug");
        }
        self.inner.find_by_slug(slug).await
    }

    async fn create_with_owner(&self, org: Organization, email: &str) -> OrgResult<Organization> {
        self.inner.create_with_owner(org, email).await
    }

    async fn delete(&self, id: Uuid) -> OrgResult<()> {
        self.inner.delete(id).await
    }

    async fn adjust_total_spaces(&self, slug: &str, action: SpaceAction) -> OrgResult<i64> {
        self.inner.adjust_total_spaces(slug, action).await
    }

    async fn roles(&self, id: Uuid) -> OrgResult<Vec<OrganizationRole>> {
        self.inner.roles(id).await
    }

    async fn members(&self, id: Uuid) -> OrgResult<Vec<OrganizationMembership>> {
        self.inner.members(id).await
    }
}

#[tokio::test]
async fn test_request_without_reply_to_uses_default_key() {
    let fixture = Fixture::with_org().await;
    fixture.declare_topology().await;

    let guard = ListenerGuard::new();
    let mut handle = fixture.listener.start(&guard).unwrap();
    assert!(timeout(WAIT, handle.wait_until_consuming()).await.unwrap());

    fixture.broker.inject("org.events", DISCOVERY_KEY, b"{}").unwrap();

    let answer = timeout(WAIT, fixture.broker.next_message("transformer.org.events.queue"))
        .await
        .unwrap();
    assert_eq!(answer.routing_key, "org.created");
    assert!(answer.properties.persistent);

    let envelope = EventEnvelope::decode(&answer.body).unwrap();
    assert_eq!(envelope.event_type, EventType::OrgCreated);
    assert_eq!(envelope.payload["slug"], "spacedf");

    handle.stop();
}

#[tokio::test]
async fn test_request_with_reply_to_is_answered_once_and_acked_once() {
    let fixture = Fixture::with_org().await;
    fixture.declare_topology().await;

    let guard = ListenerGuard::new();
    let mut handle = fixture.listener.start(&guard).unwrap();
    assert!(timeout(WAIT, handle.wait_until_consuming()).await.unwrap());

    fixture
        .broker
        .inject("org.events", DISCOVERY_KEY, br#"{"reply_to": "reply.queue"}"#)
        .unwrap();

    let answer = timeout(WAIT, fixture.broker.next_message("reply.queue"))
        .await
        .unwrap();
    assert_eq!(answer.exchange, "");
    assert_eq!(answer.routing_key, "reply.queue");
    let envelope = EventEnvelope::decode(&answer.body).unwrap();
    assert_eq!(envelope.event_type, EventType::OrgCreated);
    assert_eq!(envelope.payload["transformer_queue"], "spacedf.transformer.queue");

    // Settlement happens right after the publish on the listener task.
    timeout(WAIT, async {
        while fixture.broker.settlements().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(fixture.broker.settlements(), vec![Settlement::Ack { delivery_tag: 1 }]);
    assert!(fixture.broker.take_message("reply.queue").is_none());
    assert!(fixture.broker.take_message("transformer.org.events.queue").is_none());

    handle.stop();
}

#[tokio::test]
async fn test_listener_starts_once_per_guard() {
    let fixture = Fixture::with_org().await;
    let guard = ListenerGuard::new();

    let handle = fixture.listener.start(&guard).unwrap();
    assert!(fixture.listener.start(&guard).is_none());
    assert!(guard.is_started());

    handle.stop();
}

#[tokio::test]
async fn test_listener_declares_its_own_queue() {
    let fixture = Fixture::with_org().await;
    let guard = ListenerGuard::new();

    let mut handle = fixture.listener.start(&guard).unwrap();
    assert!(timeout(WAIT, handle.wait_until_consuming()).await.unwrap());

    assert!(fixture.broker.has_exchange("org.events"));
    assert_eq!(
        fixture.broker.bindings("console.org.discovery.queue"),
        vec![("org.events".to_string(), DISCOVERY_KEY.to_string())]
    );

    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_connection_loss() {
    let fixture = Fixture::with_org().await;
    fixture.declare_topology().await;

    let guard = ListenerGuard::new();
    let mut handle = fixture.listener.start(&guard).unwrap();
    assert!(handle.wait_until_consuming().await);

    fixture.broker.disconnect_all();
    assert!(handle.wait_until_reconnecting().await);
    let lost_at = Instant::now();
    assert!(matches!(
        handle.health(),
        ListenerHealth::Reconnecting { attempt: 1, .. }
    ));

    assert!(handle.wait_until_consuming().await);
    let elapsed = lost_at.elapsed();
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(6));
    assert_eq!(handle.restarts(), 1);

    // The new session answers requests.
    fixture
        .broker
        .inject("org.events", DISCOVERY_KEY, br#"{"reply_to": "reply.queue"}"#)
        .unwrap();
    let answer = fixture.broker.next_message("reply.queue").await;
    assert_eq!(answer.routing_key, "reply.queue");

    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_listener_survives_a_panicking_session() {
    let store = MemoryOrganizationStore::new();
    let org = Organization::new(Uuid::new_v4(), "SpaceDF", "spacedf")
        .unwrap()
        .with_vhost("spacedf", Utc::now());
    store.create_with_owner(org, "owner@spacedf.io").await.unwrap();
    let fixture = Fixture::new(Arc::new(PanicOnceStore::new(store)));
    fixture.declare_topology().await;

    let guard = ListenerGuard::new();
    let mut handle = fixture.listener.start(&guard).unwrap();
    assert!(handle.wait_until_consuming().await);

    fixture.broker.inject("org.events", DISCOVERY_KEY, b"{}").unwrap();
    assert!(handle.wait_until_reconnecting().await);
    match handle.health() {
        ListenerHealth::Reconnecting { attempt, last_error } => {
            assert_eq!(attempt, 1);
            assert!(last_error.contains("panicked"));
        }
        other => panic!("unexpected health {:?}", other),
    }

    assert!(handle.wait_until_consuming().await);
    assert!(!handle.is_finished());
    assert_eq!(handle.restarts(), 1);

    // The request returned to the queue with the dead session and is
    // answered by the next one.
    let answer = fixture
        .broker
        .next_message("transformer.org.events.queue")
        .await;
    let envelope = EventEnvelope::decode(&answer.body).unwrap();
    assert_eq!(envelope.payload["slug"], "spacedf");
    assert_eq!(handle.restarts(), 1);
    assert!(fixture.listener.start(&guard).is_none());

    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_broker_keeps_retrying() {
    let fixture = Fixture::with_org().await;
    fixture.broker.set_refuse_connections(true);

    let guard = ListenerGuard::new();
    let mut handle = fixture.listener.start(&guard).unwrap();

    // Failures at 0s, 5s and 10s.
    tokio::time::sleep(Duration::from_secs(12)).await;
    match handle.health() {
        ListenerHealth::Reconnecting { attempt, last_error } => {
            assert_eq!(attempt, 3);
            assert!(last_error.contains("connection refused"));
        }
        other => panic!("unexpected health {:?}", other),
    }
    assert_eq!(handle.restarts(), 3);

    fixture.broker.set_refuse_connections(false);
    assert!(handle.wait_until_consuming().await);
    assert_eq!(handle.restarts(), 3);
    assert!(!handle.is_finished());

    handle.stop();
}

#[tokio::test(start_paused = true)]
async fn test_injected_restart_policy() {
    let fixture = Fixture::with_org().await;
    fixture.broker.set_refuse_connections(true);

    let listener = fixture
        .listener
        .clone()
        .with_restart_policy(Arc::new(BackoffPolicy::exponential()));
    let guard = ListenerGuard::new();
    let handle = listener.start(&guard).unwrap();

    // Failures at 0s, 1s and 3s; the next one is due at 7s.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(handle.restarts(), 3);

    handle.stop();
}

#[tokio::test]
async fn test_lookup_failure_requeues() {
    let fixture = Fixture::new(Arc::new(UnavailableStore));
    fixture.declare_topology().await;
    fixture.broker.inject("org.events", DISCOVERY_KEY, b"{}").unwrap();

    let handler = DiscoveryHandler::new(
        Arc::new(UnavailableStore),
        Arc::new(MemoryProvisioner::new()),
        EventsConfig::default(),
    );
    let channel = fixture.broker.connect().await.unwrap();
    let mut consumer = channel
        .consume("console.org.discovery.queue", "test")
        .await
        .unwrap();
    let delivery = consumer.next_delivery().await.unwrap().unwrap();

    let outcome = handler.handle(channel.as_ref(), &delivery).await.unwrap();
    assert!(matches!(outcome, DiscoveryOutcome::LookupFailed(_)));
    assert_eq!(
        fixture.broker.settlements(),
        vec![Settlement::Nack {
            delivery_tag: delivery.delivery_tag,
            requeue: true
        }]
    );
    assert_eq!(fixture.broker.queue_depth("console.org.discovery.queue"), 1);
}
