use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventStoreError, Result};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
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

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Version number for an aggregate, used for optimistic concurrency control.
///
/// A fresh aggregate sits at version 0. Every applied event moves it to a
/// strictly greater version; the default step is +1, but aggregates may pick
/// any increasing scheme (ticks, timestamps) as long as it fits in an `i64`.
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

    /// Returns the next version, or `None` once `i64::MAX` is reached.
    pub fn next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true when no event has been applied yet.
    pub fn is_initial(&self) -> bool {
        self.0 == 0
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

/// Addresses one aggregate's records in a backend: the aggregate's storage
/// contract plus the textual form of its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId {
    pub aggregate_type: String,
    pub key: String,
}

impl StreamId {
    pub fn new(aggregate_type: impl Into<String>, key: impl ToString) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            key: key.to_string(),
        }
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.key)
    }
}

/// A domain event as the storage layer sees it.
///
/// The payload is opaque JSON; `contract` and `schema_version` tell the
/// reading side which runtime type to decode it into and whether it must be
/// upcast first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// The stream this event belongs to.
    pub stream: StreamId,

    /// The version of the aggregate after this event.
    pub version: Version,

    /// Stable storage name of the event type (e.g. "bank.account.deposited").
    pub contract: String,

    /// Schema version of `payload` under `contract`.
    pub schema_version: u32,

    /// When the event was raised.
    pub timestamp: DateTime<Utc>,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// Additional metadata about the event.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StoredEvent {
    /// Creates a new stored event builder.
    pub fn builder() -> StoredEventBuilder {
        StoredEventBuilder::default()
    }
}

/// Builder for constructing stored events.
#[derive(Debug, Default)]
pub struct StoredEventBuilder {
    event_id: Option<EventId>,
    stream: Option<StreamId>,
    version: Option<Version>,
    contract: Option<String>,
    schema_version: Option<u32>,
    timestamp: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
}

impl StoredEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn stream(mut self, stream: StreamId) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the contract name and the schema version the payload follows.
    pub fn contract(mut self, contract: impl Into<String>, schema_version: u32) -> Self {
        self.contract = Some(contract.into());
        self.schema_version = Some(schema_version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
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

    /// Builds the stored event, failing on the first missing required field.
    pub fn build(self) -> Result<StoredEvent> {
        Ok(StoredEvent {
            event_id: self.event_id.unwrap_or_default(),
            stream: self.stream.ok_or(EventStoreError::MissingField("stream"))?,
            version: self.version.ok_or(EventStoreError::MissingField("version"))?,
            contract: self
                .contract
                .ok_or(EventStoreError::MissingField("contract"))?,
            schema_version: self
                .schema_version
                .ok_or(EventStoreError::MissingField("schema_version"))?,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            payload: self
                .payload
                .ok_or(EventStoreError::MissingField("payload"))?,
            metadata: self.metadata,
        })
    }
}
