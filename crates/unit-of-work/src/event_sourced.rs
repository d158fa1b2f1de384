//! Append-only persistence strategy.

use async_trait::async_trait;
use domain::{AggregateRoot, EventStreamHistory, RecordCodec, RecordOf};
use event_store::{EventStore, Version};

use crate::error::{RepositoryError, Result};
use crate::persistence::Persistence;

/// When the event-sourced strategy stores a snapshot next to new events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotPolicy {
    #[default]
    Never,
    /// Whenever the version crosses a multiple of `n`.
    Every(u64),
}

impl SnapshotPolicy {
    /// `Every(n)`, or `Never` for `n == 0`.
    pub fn every(n: u64) -> Self {
        if n == 0 { Self::Never } else { Self::Every(n) }
    }

    /// Returns true if moving from `from` to `to` crosses a snapshot point.
    pub fn should_snapshot(&self, from: Version, to: Version) -> bool {
        match *self {
            Self::Never | Self::Every(0) => false,
            Self::Every(n) => {
                let n = i64::try_from(n).unwrap_or(i64::MAX);
                to > from && to.as_i64().div_euclid(n) > from.as_i64().div_euclid(n)
            }
        }
    }
}

/// Stores aggregates as event streams in an [`EventStore`].
///
/// Loading restores the aggregate through [`EventStreamHistory`]. Writing
/// appends the aggregate's pending events under an optimistic version check
/// and, when the [`SnapshotPolicy`] asks for it, replaces the stream's
/// snapshot in the same call. An aggregate inserted without events is stored
/// as a snapshot so the stream exists.
pub struct EventSourced<S> {
    store: S,
    codec: RecordCodec,
    policy: SnapshotPolicy,
}

impl<S: EventStore> EventSourced<S> {
    pub fn new(store: S, codec: RecordCodec) -> Self {
        Self {
            store,
            codec,
            policy: SnapshotPolicy::Never,
        }
    }

    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    async fn append<A: AggregateRoot>(
        &self,
        aggregate: &mut A,
        original_version: Option<Version>,
    ) -> Result<Vec<RecordOf<A>>> {
        let stream = self.codec.stream_id::<A>(aggregate.key())?;
        let events = aggregate
            .uncommitted()
            .iter()
            .map(|record| self.codec.encode_event::<A>(&stream, record))
            .collect::<domain::Result<Vec<_>>>()?;

        let from = original_version.unwrap_or_default();
        let snapshot = if (events.is_empty() && original_version.is_none())
            || self.policy.should_snapshot(from, aggregate.version())
        {
            Some(self.codec.encode_snapshot(&stream, &*aggregate)?)
        } else {
            None
        };

        let appended = events.len() as u64;
        let with_snapshot = snapshot.is_some();
        self.store
            .insert_events(&stream, snapshot, original_version, events)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(aggregate.key(), e))?;

        metrics::counter!("event_store_events_appended_total").increment(appended);
        tracing::debug!(%stream, appended, with_snapshot, "events appended");
        Ok(aggregate.commit())
    }
}

#[async_trait]
impl<A, S> Persistence<A> for EventSourced<S>
where
    A: AggregateRoot,
    S: EventStore + 'static,
{
    async fn select_by_key(&self, key: &A::Key) -> Result<Option<A>> {
        let stream = self.codec.stream_id::<A>(key)?;
        let Some(history) = self
            .store
            .select_history(&stream)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(key, e))?
        else {
            return Ok(None);
        };

        let aggregate = EventStreamHistory::new(key.clone(), history).restore::<A>(&self.codec)?;
        Ok(Some(aggregate))
    }

    async fn insert(&self, aggregate: &mut A) -> Result<Vec<RecordOf<A>>> {
        self.append(aggregate, None).await
    }

    async fn update(
        &self,
        aggregate: &mut A,
        original_version: Version,
    ) -> Result<Vec<RecordOf<A>>> {
        self.append(aggregate, Some(original_version)).await
    }

    async fn delete(&self, key: &A::Key) -> Result<()> {
        let stream = self.codec.stream_id::<A>(key)?;
        self.store
            .delete_stream(&stream)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(key, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Note, NoteEvent};
    use event_store::{ContractRegistry, InMemoryEventStore};

    fn strategy(policy: SnapshotPolicy) -> EventSourced<InMemoryEventStore> {
        EventSourced::new(
            InMemoryEventStore::new(),
            RecordCodec::new(
                ContractRegistry::new()
                    .with("test.note", "note", 1)
                    .with("Written", "note.written", 1)
                    .with("Erased", "note.erased", 1),
            ),
        )
        .with_snapshot_policy(policy)
    }

    #[test]
    fn policy_crossing_points() {
        let every_three = SnapshotPolicy::every(3);
        assert!(!every_three.should_snapshot(Version::new(0), Version::new(2)));
        assert!(every_three.should_snapshot(Version::new(2), Version::new(3)));
        assert!(every_three.should_snapshot(Version::new(1), Version::new(7)));
        assert!(!every_three.should_snapshot(Version::new(3), Version::new(5)));
        assert!(!SnapshotPolicy::every(0).should_snapshot(Version::new(0), Version::new(9)));
    }

    #[tokio::test]
    async fn insert_then_select_round_trips() {
        let strategy = strategy(SnapshotPolicy::Never);
        let mut note = Note::written("n-1", "first");
        note.write("second");

        let events = strategy.insert(&mut note).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(note.uncommitted().is_empty());

        let loaded: Note = strategy
            .select_by_key(&"n-1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.lines, vec!["first", "second"]);
        assert_eq!(loaded.version, Version::new(2));

        let stream = strategy.codec().stream_id::<Note>(&note.key).unwrap();
        assert!(!strategy.store().has_snapshot(&stream).await);
    }

    #[tokio::test]
    async fn stale_update_is_a_concurrency_conflict() {
        let strategy = strategy(SnapshotPolicy::Never);
        let mut note = Note::written("n-1", "first");
        strategy.insert(&mut note).await.unwrap();

        let mut first: Note = strategy
            .select_by_key(&"n-1".to_string())
            .await
            .unwrap()
            .unwrap();
        let mut second = first.clone();
        first.write("from first");
        second.write("from second");

        strategy.update(&mut first, Version::first()).await.unwrap();
        let err = strategy
            .update(&mut second, Version::first())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RepositoryError::ConcurrencyConflict { actual: Some(v), .. } if v == Version::new(2)
        ));
        assert_eq!(second.uncommitted().len(), 1);
    }

    #[tokio::test]
    async fn insert_of_existing_stream_is_duplicate_key() {
        let strategy = strategy(SnapshotPolicy::Never);
        strategy
            .insert(&mut Note::written("n-1", "a"))
            .await
            .unwrap();

        let err = strategy
            .insert(&mut Note::written("n-1", "b"))
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::DuplicateKey { .. }));
    }

    #[tokio::test]
    async fn empty_insert_stores_baseline_snapshot() {
        let strategy = strategy(SnapshotPolicy::Never);
        let mut note = Note::uninitialized("n-1".to_string());
        note.lines.push("set without events".to_string());

        let events = strategy.insert(&mut note).await.unwrap();
        assert!(events.is_empty());

        let loaded: Note = strategy
            .select_by_key(&"n-1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.lines, vec!["set without events"]);
    }

    #[tokio::test]
    async fn policy_snapshot_is_used_on_restore() {
        let strategy = strategy(SnapshotPolicy::Every(2));
        let mut note = Note::written("n-1", "a");
        note.write("b");
        note.raise(NoteEvent::Erased).unwrap();
        strategy.insert(&mut note).await.unwrap();

        let stream = strategy
            .codec()
            .stream_id::<Note>(&"n-1".to_string())
            .unwrap();
        assert!(strategy.store().has_snapshot(&stream).await);

        let loaded: Note = strategy
            .select_by_key(&"n-1".to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.lines.is_empty());
        assert_eq!(loaded.version, Version::new(3));
    }

    #[tokio::test]
    async fn missing_stream_selects_nothing() {
        let strategy = strategy(SnapshotPolicy::Never);
        let loaded: Option<Note> = strategy.select_by_key(&"nope".to_string()).await.unwrap();
        assert!(loaded.is_none());
    }
}
