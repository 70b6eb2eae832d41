use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use uuid::Uuid;

use crate::{AggregateId, TraceContext};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event within its aggregate's stream.
///
/// Streams are contiguous: the first event is version 1 and every following
/// event increments by one. Version 0 means "no events yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the first version (1) for the first event.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns this version moved back by `count` events, saturating at 0.
    pub fn rewind(&self, count: usize) -> Self {
        Self((self.0 - count as i64).max(0))
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// An immutable event as stored in the log.
///
/// The `event_type` tag selects the payload shape; the payload itself holds only
/// the kind-specific data. Metadata is opaque to the log and carries the trace
/// context of the command that produced the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    /// Stream category, e.g. `wallet`.
    pub aggregate_type: String,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Decodes the payload into the shape expected for this event's kind.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Extracts the propagated trace context, if the producer attached one.
    pub fn trace_context(&self) -> Option<TraceContext> {
        self.metadata
            .get(TraceContext::METADATA_KEY)
            .and_then(|v| TraceContext::deserialize(v).ok())
    }
}

/// Raised when an envelope is built without one of its required fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event envelope is missing required field `{0}`")]
pub struct EnvelopeError(pub &'static str);

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attaches a trace carrier under [`TraceContext::METADATA_KEY`].
    pub fn trace(self, trace: &TraceContext) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(trace)?;
        Ok(self.metadata(TraceContext::METADATA_KEY, value))
    }

    /// Builds the envelope, failing if a required field was never set.
    pub fn build(self) -> Result<EventEnvelope, EnvelopeError> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self.event_type.ok_or(EnvelopeError("event_type"))?,
            aggregate_id: self.aggregate_id.ok_or(EnvelopeError("aggregate_id"))?,
            aggregate_type: self.aggregate_type.ok_or(EnvelopeError("aggregate_type"))?,
            version: self.version.ok_or(EnvelopeError("version"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or(EnvelopeError("payload"))?,
            metadata: self.metadata,
        })
    }
}
