//! # Console Events
//!
//! Organization lifecycle events and tenant discovery over a shared
//! message broker.
//!
//! ## Overview
//!
//! The console-events crate handles:
//! - **Envelope**: the JSON wrapper around every lifecycle event
//! - **Topology**: the shared topic exchange and its subscriber queues
//! - **Publisher**: fire-and-forget `org.created` / `org.deleted` events
//! - **Discovery**: a supervised listener answering "which tenant is this?"
//!
//! ## Features
//!
//! - `memory` (default): in-memory broker for tests and single-process runs
//! - `amqp`: RabbitMQ backend over `lapin`
//!
//! ## Usage
//!
//! ### Publishing Events
//!
//! ```rust,no_run
//! use console_events::{EventPublisher, EventType, EventsConfig, MemoryBroker};
//! use serde_json::Map;
//! use std::sync::Arc;
//!
//! async fn publish_example() {
//!     let publisher = EventPublisher::new(Arc::new(MemoryBroker::new()), EventsConfig::default());
//!
//!     if let Some(channel) = publisher.declare_topology().await {
//!         let _ = channel.close().await;
//!     }
//!
//!     let delivered = publisher.publish_org_event(EventType::OrgDeleted, Map::new()).await;
//!     println!("delivered: {}", delivered);
//! }
//! ```
//!
//! ### Answering Discovery Requests
//!
//! ```rust,no_run
//! use console_events::{DiscoveryHandler, DiscoveryListener, EventsConfig, ListenerGuard, MemoryBroker};
//! use console_org::MemoryOrganizationStore;
//! use console_tenant::MemoryProvisioner;
//! use std::sync::Arc;
//!
//! async fn listen_example() {
//!     let config = EventsConfig::default();
//!     let handler = DiscoveryHandler::new(
//!         Arc::new(MemoryOrganizationStore::new()),
//!         Arc::new(MemoryProvisioner::new()),
//!         config.clone(),
//!     );
//!     let listener = DiscoveryListener::new(Arc::new(MemoryBroker::new()), handler, config);
//!
//!     let guard = ListenerGuard::new();
//!     let handle = listener.start(&guard).expect("first start");
//!     assert!(listener.start(&guard).is_none());
//!     println!("listener: {:?}", handle.health());
//! }
//! ```
//!
//! ## Routing Keys
//!
//! The event type doubles as the routing key:
//! - `org.created` and `org.deleted` reach every queue bound with `org.*`
//! - `org.discovery.request` reaches only the discovery queue
//!
//! Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments

pub mod backoff;
pub mod broker;
pub mod config;
pub mod discovery;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod topology;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

// Re-export main types
pub use backoff::{BackoffPolicy, RestartPolicy};
pub use broker::{
    topic_matches, Broker, BrokerChannel, BrokerError, BrokerResult, Delivery, DeliveryStream,
    ExchangeKind, ExchangeSpec, MessageProperties, QueueSpec, DEFAULT_EXCHANGE,
};
pub use config::EventsConfig;
pub use discovery::{
    AckDecision, DiscoveryHandler, DiscoveryListener, DiscoveryOutcome, ListenerGuard,
    ListenerHandle, ListenerHealth,
};
pub use envelope::{
    format_timestamp, DiscoveryRequest, EventEnvelope, EventType, OrgCreatedPayload,
    OrgDeletedPayload,
};
pub use error::{EventsError, EventsResult};
pub use publisher::EventPublisher;
pub use topology::{QueueBinding, Topology};

#[cfg(feature = "memory")]
pub use memory::{MemoryBroker, PublishedMessage, Settlement, TRAFFIC_LOG_CAPACITY};

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
