//! Event envelope and wire format
//!
//! Every lifecycle event travels as one UTF-8 JSON object:
//!
//! ```json
//! {
//!   "event_id": "5c4f1f3a-2d61-4b59-9a53-3f0e5b1f6c0d",
//!   "event_type": "org.created",
//!   "timestamp": "2026-10-18T09:30:00.123Z",
//!   "payload": { "id": "...", "slug": "acme" }
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use console_org::Organization;
use console_tenant::TenantInfo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::error::{EventsError, EventsResult};

/// Lifecycle event type, carried as a dotted string that doubles as the
/// routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// `org.created`
    OrgCreated,
    /// `org.deleted`
    OrgDeleted,
    /// Any other dotted event name
    Other(String),
}

impl EventType {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &str {
        match self {
            EventType::OrgCreated => "org.created",
            EventType::OrgDeleted => "org.deleted",
            EventType::Other(name) => name,
        }
    }

    /// Parse a wire name. Unknown names are kept verbatim.
    pub fn parse(name: &str) -> Self {
        match name {
            "org.created" => EventType::OrgCreated,
            "org.deleted" => EventType::OrgDeleted,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType::parse(name)
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(EventType::parse(&name))
    }
}

/// Format a timestamp the way envelopes carry it: millisecond precision,
/// `Z` suffix.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

mod millis_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Lifecycle event envelope.
///
/// Created fresh per publish call. The publisher never deduplicates, so
/// consumers must tolerate seeing the same logical event twice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per publish attempt
    pub event_id: Uuid,

    /// Event type, also the routing key
    pub event_type: EventType,

    /// When the event was produced
    #[serde(with = "millis_timestamp")]
    pub timestamp: DateTime<Utc>,

    /// Event-type-specific mapping
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    /// Create an envelope with a fresh v4 id stamped with the current time.
    pub fn new(event_type: EventType, payload: Map<String, Value>) -> Self {
        Self::with_id(event_type, Uuid::new_v4(), Utc::now(), payload)
    }

    /// Create an envelope from explicit parts.
    pub fn with_id(
        event_type: EventType,
        event_id: Uuid,
        timestamp: DateTime<Utc>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            event_id,
            event_type,
            timestamp,
            payload,
        }
    }

    /// Routing key the envelope is published under.
    pub fn routing_key(&self) -> &str {
        self.event_type.as_str()
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> EventsResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse the wire format.
    pub fn decode(bytes: &[u8]) -> EventsResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> EventsResult<T> {
        Ok(serde_json::from_value(Value::Object(self.payload.clone()))?)
    }
}

/// Serialize a payload struct into an envelope payload mapping.
pub fn payload_map<T: Serialize>(payload: &T) -> EventsResult<Map<String, Value>> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(EventsError::InvalidPayload(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// `org.created` payload describing a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgCreatedPayload {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub vhost: String,
    pub amqp_url: String,
    pub exchange: String,
    pub transformer_queue: String,
    pub transformed_queue: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl OrgCreatedPayload {
    /// Describe an organization and its provisioned tenant.
    pub fn new(organization: &Organization, tenant: &TenantInfo) -> Self {
        Self {
            id: organization.id,
            slug: organization.slug.clone(),
            name: organization.name.clone(),
            vhost: tenant.vhost.clone(),
            amqp_url: tenant.amqp_url.clone(),
            exchange: tenant.exchange.clone(),
            transformer_queue: tenant.transformer_queue.clone(),
            transformed_queue: tenant.transformed_queue.clone(),
            is_active: organization.is_active,
            created_at: format_timestamp(&organization.created_at),
            updated_at: format_timestamp(&organization.updated_at),
        }
    }

    /// Envelope payload mapping.
    pub fn to_payload(&self) -> EventsResult<Map<String, Value>> {
        payload_map(self)
    }
}

/// `org.deleted` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgDeletedPayload {
    pub id: Uuid,
    pub slug: String,
    pub deleted_at: String,
}

impl OrgDeletedPayload {
    /// Describe an organization deleted at `deleted_at`.
    pub fn new(organization: &Organization, deleted_at: DateTime<Utc>) -> Self {
        Self {
            id: organization.id,
            slug: organization.slug.clone(),
            deleted_at: format_timestamp(&deleted_at),
        }
    }

    /// Envelope payload mapping.
    pub fn to_payload(&self) -> EventsResult<Map<String, Value>> {
        payload_map(self)
    }
}

/// Body of a discovery request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Routing key the answer should be sent to
    #[serde(default)]
    pub reply_to: Option<String>,
}

impl DiscoveryRequest {
    /// Parse a request body. The body must be a JSON object.
    pub fn decode(bytes: &[u8]) -> EventsResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The reply routing key, treating an empty string as absent.
    pub fn reply_key(&self) -> Option<&str> {
        self.reply_to.as_deref().filter(|key| !key.is_empty())
    }
}
