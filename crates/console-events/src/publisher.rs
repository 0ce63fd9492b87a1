//! Organization event publisher
//!
//! Publishing opens a fresh connection per call. Event volume is one event
//! per organization lifecycle transition, so there is no pooling.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerChannel, BrokerResult, MessageProperties};
use crate::config::EventsConfig;
use crate::envelope::{EventEnvelope, EventType};
use crate::error::EventsResult;
use crate::topology::Topology;

/// Declares the shared topology and publishes lifecycle envelopes.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
    config: EventsConfig,
    topology: Topology,
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("exchange", &self.config.events_exchange)
            .finish()
    }
}

impl EventPublisher {
    /// Create a publisher for the given broker.
    pub fn new(broker: Arc<dyn Broker>, config: EventsConfig) -> Self {
        let topology = Topology::from_config(&config);
        Self {
            broker,
            config,
            topology,
        }
    }

    /// Publisher configuration.
    pub fn config(&self) -> &EventsConfig {
        &self.config
    }

    /// Declare the events exchange and every subscriber queue, returning
    /// the open channel.
    pub async fn try_declare_topology(&self) -> EventsResult<Box<dyn BrokerChannel>> {
        let channel = self.broker.connect().await?;

        if let Err(e) = self.topology.declare(channel.as_ref()).await {
            if let Err(close_error) = channel.close().await {
                debug!(error = %close_error, "Failed to close topology connection");
            }
            return Err(e.into());
        }

        info!(
            exchange = %self.config.events_exchange,
            queues = self.topology.bindings.len(),
            "Declared organization event topology"
        );
        Ok(channel)
    }

    /// Declare the topology, logging and swallowing failures.
    ///
    /// Returns the open channel for the caller to close, or `None` when
    /// the broker was unreachable or rejected a declaration.
    pub async fn declare_topology(&self) -> Option<Box<dyn BrokerChannel>> {
        match self.try_declare_topology().await {
            Ok(channel) => Some(channel),
            Err(e) => {
                error!(error = %e, "Failed to declare organization event topology");
                None
            }
        }
    }

    /// Wrap the parts into an envelope and publish it.
    ///
    /// Returns `true` only when the broker accepted the message. Failures are
    /// logged, never raised.
    pub async fn publish_event(
        &self,
        event_type: EventType,
        event_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: Map<String, Value>,
    ) -> bool {
        let envelope = EventEnvelope::with_id(event_type, event_id, timestamp, payload);
        self.publish(&envelope).await
    }

    /// Publish with a fresh event id and the current time.
    pub async fn publish_org_event(&self, event_type: EventType, payload: Map<String, Value>) -> bool {
        self.publish(&EventEnvelope::new(event_type, payload)).await
    }

    /// Publish a prepared envelope under its event type.
    #[instrument(skip(self, envelope), fields(event_type = %envelope.event_type, event_id = %envelope.event_id))]
    pub async fn publish(&self, envelope: &EventEnvelope) -> bool {
        match self.try_publish(envelope).await {
            Ok(()) => {
                info!("Published organization event");
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to publish organization event");
                false
            }
        }
    }

    async fn try_publish(&self, envelope: &EventEnvelope) -> EventsResult<()> {
        let body = envelope.encode()?;
        let channel = self.broker.connect().await?;

        let result: BrokerResult<()> = async {
            channel.declare_exchange(&self.topology.exchange).await?;
            channel
                .publish(
                    &self.config.events_exchange,
                    envelope.routing_key(),
                    &MessageProperties::persistent_json(),
                    &body,
                )
                .await
        }
        .await;

        if let Err(e) = channel.close().await {
            debug!(error = %e, "Failed to close publisher connection");
        }
        Ok(result?)
    }
}
