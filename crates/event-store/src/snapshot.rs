use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{StoredEvent, StreamId, Version};

/// A snapshot of an aggregate's state at a specific version.
///
/// Snapshots are either the only record of an aggregate (snapshot
/// repositories) or a starting point that saves replaying the whole event
/// history (event-sourced repositories with a snapshot policy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSnapshot {
    /// The stream this snapshot belongs to.
    pub stream: StreamId,

    /// The version of the aggregate at the time of the snapshot.
    pub version: Version,

    /// Stable storage name of the snapshot type.
    pub contract: String,

    /// Schema version of `state` under `contract`.
    pub schema_version: u32,

    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,

    /// The serialized memento.
    pub state: serde_json::Value,
}

impl StoredSnapshot {
    /// Creates a new snapshot.
    pub fn new(
        stream: StreamId,
        version: Version,
        contract: impl Into<String>,
        schema_version: u32,
        state: serde_json::Value,
    ) -> Self {
        Self {
            stream,
            version,
            contract: contract.into(),
            schema_version,
            timestamp: Utc::now(),
            state,
        }
    }

    /// Creates a snapshot from a serializable state.
    pub fn from_state<T: Serialize>(
        stream: StreamId,
        version: Version,
        contract: impl Into<String>,
        schema_version: u32,
        state: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            stream,
            version,
            contract,
            schema_version,
            serde_json::to_value(state)?,
        ))
    }
}

/// Everything a backend holds for one stream: the latest snapshot, if any,
/// and the events recorded after it.
///
/// Backends are free to return events out of order or to include events
/// already covered by the snapshot; the restoring side sorts and skips.
#[derive(Debug, Clone, Default)]
pub struct History {
    pub snapshot: Option<StoredSnapshot>,
    pub events: Vec<StoredEvent>,
}

impl History {
    pub fn new(snapshot: Option<StoredSnapshot>, events: Vec<StoredEvent>) -> Self {
        Self { snapshot, events }
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.is_none() && self.events.is_empty()
    }

    /// Highest version recorded in this history.
    pub fn last_version(&self) -> Option<Version> {
        let from_events = self.events.iter().map(|e| e.version).max();
        let from_snapshot = self.snapshot.as_ref().map(|s| s.version);
        from_events.max(from_snapshot)
    }
}
