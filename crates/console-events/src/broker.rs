//! Message broker abstraction
//!
//! This module defines the slice of an AMQP 0-9-1 broker that the publisher
//! and the discovery listener use. [`Broker::connect`] opens one connection
//! with one channel; everything else happens on the returned
//! [`BrokerChannel`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the broker's default exchange, which routes by queue name.
pub const DEFAULT_EXCHANGE: &str = "";

/// JSON content type set on every published message.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Broker error types.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Failed to open a connection or channel
    #[error("Connection error: {0}")]
    Connection(String),

    /// Channel-level protocol failure
    #[error("Channel error: {0}")]
    Channel(String),

    /// Redeclaration with different arguments
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Referenced exchange or queue does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failed to publish a message
    #[error("Failed to publish message: {0}")]
    Publish(String),

    /// Connection or channel already closed
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Exchange routing type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    /// Routing key pattern match with `*` and `#`
    Topic,
    /// Exact routing key match
    Direct,
    /// Every bound queue
    Fanout,
}

/// Exchange declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    /// Exchange name
    pub name: String,
    /// Routing type
    pub kind: ExchangeKind,
    /// Survives broker restart
    pub durable: bool,
    /// Deleted when the last queue unbinds
    pub auto_delete: bool,
}

impl ExchangeSpec {
    /// A durable topic exchange.
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
            durable: true,
            auto_delete: false,
        }
    }

    /// A durable direct exchange.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Direct,
            durable: true,
            auto_delete: false,
        }
    }
}

/// Queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// Queue name
    pub name: String,
    /// Survives broker restart
    pub durable: bool,
    /// Owned by the declaring connection
    pub exclusive: bool,
    /// Deleted when the last consumer goes away
    pub auto_delete: bool,
}

impl QueueSpec {
    /// A durable, shared queue.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// Message properties the subsystem sets or reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// MIME content type
    pub content_type: Option<String>,
    /// Delivery mode 2
    pub persistent: bool,
}

impl MessageProperties {
    /// Persistent JSON message properties.
    pub fn persistent_json() -> Self {
        Self {
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
            persistent: true,
        }
    }
}

/// A message delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to ack or nack
    pub delivery_tag: u64,
    /// Exchange the message was published to
    pub exchange: String,
    /// Routing key the message was published with
    pub routing_key: String,
    /// Whether this message was delivered before
    pub redelivered: bool,
    /// Message properties
    pub properties: MessageProperties,
    /// Raw message body
    pub body: Vec<u8>,
}

/// A broker the subsystem can open connections to.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a fresh connection and return its channel.
    async fn connect(&self) -> BrokerResult<Box<dyn BrokerChannel>>;
}

/// One channel on one connection.
///
/// Declarations are idempotent when the arguments match an existing entity
/// and fail with [`BrokerError::PreconditionFailed`] when they do not.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare an exchange.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> BrokerResult<()>;

    /// Declare a queue.
    async fn declare_queue(&self, spec: &QueueSpec) -> BrokerResult<()>;

    /// Bind a queue to an exchange under a routing key.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> BrokerResult<()>;

    /// Limit the number of unacknowledged deliveries on this channel.
    async fn set_prefetch(&self, count: u16) -> BrokerResult<()>;

    /// Publish a message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        properties: &MessageProperties,
        body: &[u8],
    ) -> BrokerResult<()>;

    /// Start consuming a queue.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<Box<dyn DeliveryStream>>;

    /// Acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64) -> BrokerResult<()>;

    /// Negatively acknowledge a delivery, optionally requeueing it.
    async fn nack(&self, delivery_tag: u64, requeue: bool) -> BrokerResult<()>;

    /// Close the channel and its connection.
    async fn close(&self) -> BrokerResult<()>;

    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;
}

/// Deliveries from a consumer.
#[async_trait]
pub trait DeliveryStream: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `None` once the consumer is cancelled. A connection loss
    /// surfaces as an error.
    async fn next_delivery(&mut self) -> Option<BrokerResult<Delivery>>;
}

/// Check if a routing key matches a topic binding pattern.
///
/// `*` matches exactly one dot-separated word and `#` matches zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let words: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    words_match(&pattern, &words)
}

fn words_match(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => {
            if rest.is_empty() {
                return true;
            }
            (0..=words.len()).any(|skip| words_match(rest, &words[skip..]))
        }
        Some((&"*", rest)) => !words.is_empty() && words_match(rest, &words[1..]),
        Some((segment, rest)) => {
            words.first() == Some(segment) && words_match(rest, &words[1..])
        }
    }
}
