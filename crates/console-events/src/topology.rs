//! Broker topology for organization events.

use crate::broker::{BrokerChannel, BrokerResult, ExchangeSpec, QueueSpec};
use crate::config::EventsConfig;

/// A queue and the key it is bound to the events exchange with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: QueueSpec,
    pub routing_key: String,
}

/// Exchange, queues and bindings to declare before publishing or consuming.
///
/// Declaration is idempotent, so every connection may redeclare it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: ExchangeSpec,
    pub bindings: Vec<QueueBinding>,
}

impl Topology {
    /// Full topology: the events exchange plus the transformer, broker-bridge
    /// and discovery queues.
    pub fn from_config(config: &EventsConfig) -> Self {
        let mut topology = Self::subscribers(config);
        topology.bindings.push(Self::discovery_binding(config));
        topology
    }

    /// The events exchange and the two subscriber queues.
    pub fn subscribers(config: &EventsConfig) -> Self {
        Self {
            exchange: ExchangeSpec::topic(&config.events_exchange),
            bindings: vec![
                QueueBinding {
                    queue: QueueSpec::durable(&config.transformer_queue),
                    routing_key: config.events_routing_key.clone(),
                },
                QueueBinding {
                    queue: QueueSpec::durable(&config.broker_bridge_queue),
                    routing_key: config.events_routing_key.clone(),
                },
            ],
        }
    }

    /// The events exchange and the discovery queue only.
    pub fn discovery(config: &EventsConfig) -> Self {
        Self {
            exchange: ExchangeSpec::topic(&config.events_exchange),
            bindings: vec![Self::discovery_binding(config)],
        }
    }

    fn discovery_binding(config: &EventsConfig) -> QueueBinding {
        QueueBinding {
            queue: QueueSpec::durable(&config.discovery_queue),
            routing_key: config.discovery_routing_key.clone(),
        }
    }

    /// Declare everything on `channel`.
    pub async fn declare(&self, channel: &dyn BrokerChannel) -> BrokerResult<()> {
        channel.declare_exchange(&self.exchange).await?;
        for binding in &self.bindings {
            channel.declare_queue(&binding.queue).await?;
            channel
                .bind_queue(&binding.queue.name, &self.exchange.name, &binding.routing_key)
                .await?;
        }
        Ok(())
    }
}
