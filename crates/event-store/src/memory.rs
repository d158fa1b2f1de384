use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventStoreError, History, Result, StoredEvent, StoredSnapshot, StreamId, Version,
    store::{EventStore, SnapshotStore, validate_events_for_append},
};

/// Call counters shared by the in-memory backends.
#[derive(Debug, Default)]
pub struct StoreStats {
    writes: AtomicUsize,
    deletes: AtomicUsize,
}

impl StoreStats {
    /// Number of successful insert/update calls.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of delete calls.
    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
struct Stream {
    snapshot: Option<StoredSnapshot>,
    events: Vec<StoredEvent>,
}

impl Stream {
    fn version(&self) -> Version {
        let from_events = self.events.last().map(|e| e.version);
        let from_snapshot = self.snapshot.as_ref().map(|s| s.version);
        from_events
            .max(from_snapshot)
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store for tests and demos.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<HashMap<StreamId, Stream>>>,
    stats: Arc<StoreStats>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.streams
            .read()
            .await
            .values()
            .map(|s| s.events.len())
            .sum()
    }

    /// Returns true if the stream holds a snapshot.
    pub async fn has_snapshot(&self, stream: &StreamId) -> bool {
        self.streams
            .read()
            .await
            .get(stream)
            .is_some_and(|s| s.snapshot.is_some())
    }

    /// Writes raw records, bypassing all checks. Used to seed legacy data.
    pub async fn seed(&self, stream: StreamId, events: Vec<StoredEvent>) {
        self.streams
            .write()
            .await
            .entry(stream)
            .or_default()
            .events
            .extend(events);
    }

    /// Clears all streams.
    pub async fn clear(&self) {
        self.streams.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn select_history(&self, stream: &StreamId) -> Result<Option<History>> {
        let streams = self.streams.read().await;
        Ok(streams
            .get(stream)
            .map(|s| History::new(s.snapshot.clone(), s.events.clone())))
    }

    async fn insert_events(
        &self,
        stream: &StreamId,
        snapshot: Option<StoredSnapshot>,
        original_version: Option<Version>,
        events: Vec<StoredEvent>,
    ) -> Result<Version> {
        validate_events_for_append(stream, &events)?;

        let mut streams = self.streams.write().await;
        let current = streams.get(stream).map(Stream::version);

        match (original_version, current) {
            (None, Some(_)) => return Err(EventStoreError::DuplicateStream(stream.clone())),
            (Some(expected), actual) if actual != Some(expected) => {
                return Err(EventStoreError::ConcurrencyConflict {
                    stream: stream.clone(),
                    expected,
                    actual,
                });
            }
            _ => {}
        }

        // Check for version overlap (unique constraint simulation)
        let base = current.unwrap_or(Version::initial());
        if let Some(first) = events.first()
            && first.version <= base
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: stream.clone(),
                expected: original_version.unwrap_or(base),
                actual: current,
            });
        }

        let entry = streams.entry(stream.clone()).or_default();
        entry.events.extend(events);
        if snapshot.is_some() {
            entry.snapshot = snapshot;
        }
        self.stats.writes.fetch_add(1, Ordering::SeqCst);

        Ok(entry.version())
    }

    async fn delete_stream(&self, stream: &StreamId) -> Result<()> {
        self.streams.write().await.remove(stream);
        self.stats.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory snapshot store for tests and demos.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<StreamId, StoredSnapshot>>>,
    stats: Arc<StoreStats>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    pub async fn snapshot_count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn select_snapshot(&self, stream: &StreamId) -> Result<Option<StoredSnapshot>> {
        Ok(self.snapshots.read().await.get(stream).cloned())
    }

    async fn insert_snapshot(&self, snapshot: StoredSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(&snapshot.stream) {
            return Err(EventStoreError::DuplicateStream(snapshot.stream));
        }
        snapshots.insert(snapshot.stream.clone(), snapshot);
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_snapshot(
        &self,
        snapshot: StoredSnapshot,
        original_version: Version,
    ) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        let actual = snapshots.get(&snapshot.stream).map(|s| s.version);
        if actual != Some(original_version) {
            return Err(EventStoreError::ConcurrencyConflict {
                stream: snapshot.stream,
                expected: original_version,
                actual,
            });
        }
        snapshots.insert(snapshot.stream.clone(), snapshot);
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_snapshot(&self, stream: &StreamId) -> Result<()> {
        self.snapshots.write().await.remove(stream);
        self.stats.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
