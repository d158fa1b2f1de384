//! Rebuilding aggregates from stored histories.

use common::AggregateKey;
use event_store::{History, Version};
use tracing::debug;

use crate::aggregate::AggregateRoot;
use crate::codec::RecordCodec;
use crate::error::{DomainError, Result};

/// A stored history bound to the aggregate key it belongs to.
#[derive(Debug, Clone)]
pub struct EventStreamHistory<K> {
    key: K,
    history: History,
}

impl<K: AggregateKey> EventStreamHistory<K> {
    pub fn new(key: K, history: History) -> Self {
        Self { key, history }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn last_version(&self) -> Option<Version> {
        self.history.last_version()
    }

    /// Restores the aggregate this history describes.
    ///
    /// Starts from the snapshot when there is one, otherwise from
    /// [`AggregateRoot::uninitialized`], then replays the events that follow
    /// it in version order. Events at or below the snapshot's version are
    /// skipped.
    ///
    /// A snapshot of the wrong memento type fails with
    /// [`DomainError::RestoreFailed`]. Every other failure (a missing
    /// upcaster, an unknown contract, a version that does not increase)
    /// surfaces as [`DomainError::CouldNotRestoreAggregate`].
    #[tracing::instrument(skip(self, codec), fields(aggregate_type = A::aggregate_type(), key = %self.key))]
    pub fn restore<A>(self, codec: &RecordCodec) -> Result<A>
    where
        A: AggregateRoot<Key = K>,
    {
        let Self { key, history } = self;
        let cannot_restore = |reason: String| DomainError::CouldNotRestoreAggregate {
            aggregate_type: A::aggregate_type(),
            key: key.to_string(),
            reason,
        };

        let (mut aggregate, covered) = match history.snapshot {
            Some(snapshot) => {
                let aggregate: A = codec.decode_snapshot(snapshot).map_err(|e| match e {
                    e @ DomainError::RestoreFailed { .. } => e,
                    other => cannot_restore(other.to_string()),
                })?;
                if aggregate.key() != &key {
                    return Err(cannot_restore(format!(
                        "snapshot belongs to key {}",
                        aggregate.key()
                    )));
                }
                let covered = aggregate.version();
                (aggregate, Some(covered))
            }
            None => (A::uninitialized(key.clone()), None),
        };

        let mut events = history.events;
        events.sort_by_key(|e| e.version);

        let mut replayed = 0usize;
        for stored in events {
            if covered.is_some_and(|v| stored.version <= v) {
                continue;
            }
            let record = codec
                .decode_event::<A>(&key, stored)
                .map_err(|e| cannot_restore(e.to_string()))?;
            aggregate
                .apply(&record)
                .map_err(|e| cannot_restore(e.to_string()))?;
            replayed += 1;
        }

        debug!(
            version = %aggregate.version(),
            from_snapshot = covered.is_some(),
            replayed,
            "Aggregate restored"
        );
        Ok(aggregate)
    }
}
