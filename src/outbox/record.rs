use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::metadata::EventMetadata;

/// Lifecycle state of an outbox row.
///
/// `Published` and `DeadLetter` are terminal. `Failed` is accepted for
/// compatibility with stores that persist it but is never written by the
/// poller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Published,
    Failed,
    DeadLetter,
}

impl OutboxStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Published | OutboxStatus::DeadLetter)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
            OutboxStatus::DeadLetter => "dead_letter",
        }
    }
}

/// A persisted domain event awaiting (or done with) dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    pub id: String,
    /// Dot-namespaced routing key, `<aggregate>.<verb>`.
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub metadata: EventMetadata,
    #[serde(default)]
    pub status: OutboxStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Create a pending event with a generated id and correlation id.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        let metadata = EventMetadata::generate();
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            created_at: metadata.timestamp,
            metadata,
            status: OutboxStatus::Pending,
            retry_count: 0,
            next_retry_at: None,
            last_error: None,
            published_at: None,
        }
    }

    /// Create a pending event from any payload that serializes to a JSON object.
    pub fn encode<T: Serialize>(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(payload)? {
            Value::Object(map) => Ok(Self::new(event_type, aggregate_type, aggregate_id, map)),
            other => Err(serde::ser::Error::custom(format!(
                "outbox payload must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    /// First dot-segment of the event type (`lead` for `lead.created`).
    pub fn aggregate_prefix(&self) -> &str {
        aggregate_prefix(&self.event_type)
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    pub fn is_published(&self) -> bool {
        self.status == OutboxStatus::Published
    }

    pub fn is_dead_letter(&self) -> bool {
        self.status == OutboxStatus::DeadLetter
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending and not held back by a future `next_retry_at`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_retry_at.map_or(true, |at| at <= now)
    }
}

/// First dot-segment of an event type.
pub(crate) fn aggregate_prefix(event_type: &str) -> &str {
    event_type.split('.').next().unwrap_or(event_type)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
