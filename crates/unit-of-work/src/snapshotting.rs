//! Overwrite-in-place persistence strategy.

use async_trait::async_trait;
use domain::{AggregateRoot, DomainError, RecordCodec, RecordOf};
use event_store::{SnapshotStore, Version};

use crate::error::{RepositoryError, Result};
use crate::persistence::Persistence;

/// Stores each aggregate as one snapshot in a [`SnapshotStore`].
///
/// Events raised by the aggregate are not stored, only committed and handed
/// back for publication. Updates go through
/// [`SnapshotStore::update_snapshot`], which backends that cannot overwrite
/// leave as `NotSupported`.
pub struct Snapshotting<S> {
    store: S,
    codec: RecordCodec,
}

impl<S: SnapshotStore> Snapshotting<S> {
    /// Creates a strategy writing snapshots of each aggregate to `store`.
    pub fn new(store: S, codec: RecordCodec) -> Self {
        Self { store, codec }
    }

    /// Returns the snapshot store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait]
impl<A, S> Persistence<A> for Snapshotting<S>
where
    A: AggregateRoot,
    S: SnapshotStore + 'static,
{
    async fn select_by_key(&self, key: &A::Key) -> Result<Option<A>> {
        let stream = self.codec.stream_id::<A>(key)?;
        let Some(snapshot) = self
            .store
            .select_snapshot(&stream)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(key, e))?
        else {
            return Ok(None);
        };

        let cannot_restore = |reason: String| RepositoryError::CouldNotRestoreAggregate {
            aggregate_type: A::aggregate_type(),
            key: key.to_string(),
            reason,
        };
        let aggregate: A = self.codec.decode_snapshot(snapshot).map_err(|e| match e {
            e @ DomainError::RestoreFailed { .. } => RepositoryError::from(e),
            other => cannot_restore(other.to_string()),
        })?;
        if aggregate.key() != key {
            return Err(cannot_restore(format!(
                "snapshot belongs to key {}",
                aggregate.key()
            )));
        }
        Ok(Some(aggregate))
    }

    async fn insert(&self, aggregate: &mut A) -> Result<Vec<RecordOf<A>>> {
        let stream = self.codec.stream_id::<A>(aggregate.key())?;
        let snapshot = self.codec.encode_snapshot(&stream, &*aggregate)?;
        self.store
            .insert_snapshot(snapshot)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(aggregate.key(), e))?;
        Ok(aggregate.commit())
    }

    async fn update(
        &self,
        aggregate: &mut A,
        original_version: Version,
    ) -> Result<Vec<RecordOf<A>>> {
        let stream = self.codec.stream_id::<A>(aggregate.key())?;
        let snapshot = self.codec.encode_snapshot(&stream, &*aggregate)?;
        self.store
            .update_snapshot(snapshot, original_version)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(aggregate.key(), e))?;
        Ok(aggregate.commit())
    }

    async fn delete(&self, key: &A::Key) -> Result<()> {
        let stream = self.codec.stream_id::<A>(key)?;
        self.store
            .delete_snapshot(&stream)
            .await
            .map_err(|e| RepositoryError::from_storage::<A>(key, e))
    }
}
