use async_trait::async_trait;
use domain::{AggregateRoot, RecordOf};
use event_store::Version;

use crate::error::Result;

/// Storage strategy a [`Repository`](crate::Repository) flushes through.
///
/// `insert` and `update` store the aggregate's pending events (and whatever
/// state the strategy keeps), commit the aggregate once storage accepted the
/// write, and return the committed events for publication. A rejected write
/// leaves the pending buffer untouched.
#[async_trait]
pub trait Persistence<A: AggregateRoot>: Send + Sync + 'static {
    /// Loads the aggregate stored under `key`, if any.
    async fn select_by_key(&self, key: &A::Key) -> Result<Option<A>>;

    /// Stores an aggregate that was never persisted.
    async fn insert(&self, aggregate: &mut A) -> Result<Vec<RecordOf<A>>>;

    /// Stores the changes made to an aggregate loaded at `original_version`.
    async fn update(&self, aggregate: &mut A, original_version: Version)
    -> Result<Vec<RecordOf<A>>>;

    /// Removes everything stored under `key`.
    async fn delete(&self, key: &A::Key) -> Result<()>;
}
