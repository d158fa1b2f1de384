use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared reference to a tracked aggregate.
///
/// A repository hands out clones of the same handle for the same key, so
/// identity is pointer identity: see [`ptr_eq`](Self::ptr_eq).
#[derive(Debug)]
pub struct AggregateHandle<A> {
    inner: Arc<RwLock<A>>,
}

impl<A> AggregateHandle<A> {
    pub fn new(aggregate: A) -> Self {
        Self {
            inner: Arc::new(RwLock::new(aggregate)),
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, A> {
        self.inner.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, A> {
        self.inner.write().await
    }

    /// Returns true if both handles point at the same aggregate instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<A> Clone for AggregateHandle<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> From<A> for AggregateHandle<A> {
    fn from(aggregate: A) -> Self {
        Self::new(aggregate)
    }
}
