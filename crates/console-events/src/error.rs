//! Event subsystem errors.

use console_org::OrgError;
use thiserror::Error;

use crate::broker::BrokerError;

/// Errors raised while declaring topology, publishing or consuming events.
#[derive(Debug, Error)]
pub enum EventsError {
    /// Broker connectivity or protocol failure
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Envelope or request (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A payload did not serialize to a JSON object
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Organization lookup failed
    #[error("Organization lookup failed: {0}")]
    Lookup(#[from] OrgError),
}

/// Result type for event operations.
pub type EventsResult<T> = Result<T, EventsError>;
