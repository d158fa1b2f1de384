use async_trait::async_trait;

use crate::{EventStoreError, History, Result, StoredEvent, StoredSnapshot, StreamId, Version};

/// Backend contract for append-only event histories.
///
/// Implementations must be thread-safe and each call must be atomic for the
/// stream it touches: either the whole batch (events plus optional snapshot)
/// is recorded or nothing is.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Loads the latest snapshot and the events recorded for a stream.
    ///
    /// Returns `None` when the stream has never been written or was deleted.
    async fn select_history(&self, stream: &StreamId) -> Result<Option<History>>;

    /// Appends events, optionally replacing the stream's snapshot.
    ///
    /// With `original_version` set, the call fails with
    /// [`EventStoreError::ConcurrencyConflict`] unless the stream currently
    /// sits at exactly that version. Without it, the stream must not exist
    /// yet ([`EventStoreError::DuplicateStream`] otherwise).
    ///
    /// Returns the stream's version after the write.
    async fn insert_events(
        &self,
        stream: &StreamId,
        snapshot: Option<StoredSnapshot>,
        original_version: Option<Version>,
        events: Vec<StoredEvent>,
    ) -> Result<Version>;

    /// Removes the stream and its snapshot. Deleting a missing stream is
    /// not an error.
    async fn delete_stream(&self, stream: &StreamId) -> Result<()>;
}

/// Backend contract for overwrite-in-place snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Loads the current snapshot of a stream.
    async fn select_snapshot(&self, stream: &StreamId) -> Result<Option<StoredSnapshot>>;

    /// Stores the first snapshot of a stream.
    ///
    /// Fails with [`EventStoreError::DuplicateStream`] if one exists.
    async fn insert_snapshot(&self, snapshot: StoredSnapshot) -> Result<()>;

    /// Replaces a snapshot, checking that the stored one is still at
    /// `original_version`.
    ///
    /// Backends that only support inserts keep this default.
    async fn update_snapshot(
        &self,
        snapshot: StoredSnapshot,
        original_version: Version,
    ) -> Result<()> {
        let _ = (snapshot, original_version);
        Err(EventStoreError::NotSupported("update_snapshot"))
    }

    /// Removes a snapshot. Deleting a missing snapshot is not an error.
    async fn delete_snapshot(&self, stream: &StreamId) -> Result<()>;
}

/// Validates a batch before it is appended to `stream`.
pub fn validate_events_for_append(
    stream: &StreamId,
    events: &[StoredEvent],
) -> std::result::Result<(), EventStoreError> {
    // All events must belong to the target stream
    if let Some(stray) = events.iter().find(|e| &e.stream != stream) {
        return Err(EventStoreError::InvalidAppend(format!(
            "event {} belongs to {} instead of {stream}",
            stray.event_id, stray.stream
        )));
    }

    // Versions must be strictly increasing
    for pair in events.windows(2) {
        if pair[1].version <= pair[0].version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must increase. Got {} after {}",
                pair[1].version, pair[0].version
            )));
        }
    }

    Ok(())
}
