//! Identity map of the aggregates one repository instance tracks.

use std::collections::HashMap;
use std::sync::Arc;

use domain::{AggregateRoot, RecordOf};
use event_store::Version;
use futures_util::future::{BoxFuture, join_all};
use tokio_util::sync::CancellationToken;

use crate::error::{RepositoryError, Result};
use crate::handle::AggregateHandle;
use crate::persistence::Persistence;

/// Deletes what is stored under a key in place of the strategy's own delete.
pub type DeleteDelegate<K> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Lifecycle state of one tracked key.
pub enum Tracked<A: AggregateRoot> {
    /// Loaded from storage; `original_version` is the version storage holds.
    Selected {
        handle: AggregateHandle<A>,
        original_version: Version,
    },
    /// Created in this session and not persisted yet.
    Added { handle: AggregateHandle<A> },
    /// Scheduled for deletion.
    Removed {
        key: A::Key,
        delete: Option<DeleteDelegate<A::Key>>,
    },
}

impl<A: AggregateRoot> Tracked<A> {
    /// A loaded aggregate, baselined at `original_version`.
    pub fn selected(handle: AggregateHandle<A>, original_version: Version) -> Self {
        Self::Selected {
            handle,
            original_version,
        }
    }

    /// A new aggregate to insert on the next flush.
    pub fn added(handle: AggregateHandle<A>) -> Self {
        Self::Added { handle }
    }

    /// A pending delete of `key`, optionally through `delete`.
    pub fn removed(key: A::Key, delete: Option<DeleteDelegate<A::Key>>) -> Self {
        Self::Removed { key, delete }
    }

    /// The tracked aggregate, unless the key is scheduled for deletion.
    pub fn handle(&self) -> Option<&AggregateHandle<A>> {
        match self {
            Self::Selected { handle, .. } | Self::Added { handle } => Some(handle),
            Self::Removed { .. } => None,
        }
    }

    /// Returns true if the key is scheduled for deletion.
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed { .. })
    }

    /// True for a selected aggregate that moved past the version it was
    /// loaded at. Added and removed entries always report false.
    pub async fn has_been_updated(&self) -> bool {
        match self {
            Self::Selected {
                handle,
                original_version,
            } => handle.read().await.has_been_updated(*original_version),
            Self::Added { .. } | Self::Removed { .. } => false,
        }
    }

    fn state(&self) -> &'static str {
        match self {
            Self::Selected { .. } => "selected",
            Self::Added { .. } => "added",
            Self::Removed { .. } => "removed",
        }
    }
}

impl<A: AggregateRoot> std::fmt::Debug for Tracked<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Selected {
                original_version, ..
            } => f
                .debug_struct("Selected")
                .field("original_version", original_version)
                .finish_non_exhaustive(),
            Self::Added { .. } => f.debug_struct("Added").finish_non_exhaustive(),
            Self::Removed { key, delete } => f
                .debug_struct("Removed")
                .field("key", key)
                .field("custom_delete", &delete.is_some())
                .finish(),
        }
    }
}

/// The writes one flush performs, split by kind.
///
/// The three collections are disjoint: a key appears in at most one.
pub struct ChangeSet<A: AggregateRoot> {
    pub deletes: Vec<(A::Key, Option<DeleteDelegate<A::Key>>)>,
    pub updates: Vec<(A::Key, AggregateHandle<A>, Version)>,
    pub inserts: Vec<(A::Key, AggregateHandle<A>)>,
}

impl<A: AggregateRoot> ChangeSet<A> {
    pub fn len(&self) -> usize {
        self.deletes.len() + self.updates.len() + self.inserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a flush wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub deleted: usize,
    pub updated: usize,
    pub inserted: usize,
}

impl FlushStats {
    pub fn total(&self) -> usize {
        self.deleted + self.updated + self.inserted
    }
}

/// Key → lifecycle map with at most one entry per key.
///
/// Not synchronized; the owning repository serializes access.
pub struct AggregateSet<A: AggregateRoot> {
    entries: HashMap<A::Key, Tracked<A>>,
}

impl<A: AggregateRoot> Default for AggregateSet<A> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<A: AggregateRoot> AggregateSet<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry tracked under `key`, if any.
    pub fn try_get(&self, key: &A::Key) -> Option<&Tracked<A>> {
        self.entries.get(key)
    }

    /// Tracks `key`; fails with `DuplicateKey` if it is already tracked.
    pub fn add(&mut self, key: A::Key, tracked: Tracked<A>) -> Result<()> {
        if self.entries.contains_key(&key) {
            return Err(RepositoryError::duplicate(A::aggregate_type(), &key));
        }
        self.entries.insert(key, tracked);
        Ok(())
    }

    /// Replaces whatever is tracked under `key`.
    pub fn replace(&mut self, key: A::Key, tracked: Tracked<A>) -> Option<Tracked<A>> {
        self.entries.insert(key, tracked)
    }

    /// Stops tracking `key` and returns its entry.
    pub fn remove_by_key(&mut self, key: &A::Key) -> Option<Tracked<A>> {
        self.entries.remove(key)
    }

    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forgets every tracked entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries the next flush would write.
    pub async fn count_updated(&self) -> usize {
        let mut count = 0;
        for tracked in self.entries.values() {
            let writes = match tracked {
                Tracked::Added { .. } | Tracked::Removed { .. } => true,
                Tracked::Selected { .. } => tracked.has_been_updated().await,
            };
            if writes {
                count += 1;
            }
        }
        count
    }

    pub async fn has_updates(&self) -> bool {
        for tracked in self.entries.values() {
            match tracked {
                Tracked::Added { .. } | Tracked::Removed { .. } => return true,
                Tracked::Selected { .. } if tracked.has_been_updated().await => return true,
                Tracked::Selected { .. } => {}
            }
        }
        false
    }

    /// Splits the pending writes into deletes, updates and inserts.
    ///
    /// Selected entries that have not moved past their baseline are left out.
    pub async fn change_set(&self) -> ChangeSet<A> {
        let mut change_set = ChangeSet {
            deletes: Vec::new(),
            updates: Vec::new(),
            inserts: Vec::new(),
        };

        for (key, tracked) in &self.entries {
            match tracked {
                Tracked::Removed { delete, .. } => {
                    change_set.deletes.push((key.clone(), delete.clone()));
                }
                Tracked::Added { handle } => {
                    change_set.inserts.push((key.clone(), handle.clone()));
                }
                Tracked::Selected {
                    handle,
                    original_version,
                } => {
                    if handle.read().await.has_been_updated(*original_version) {
                        change_set
                            .updates
                            .push((key.clone(), handle.clone(), *original_version));
                    }
                }
            }
        }

        change_set
    }

    /// Writes every pending change through `persistence`: deletes first, then
    /// updates, then inserts. Calls within one phase run concurrently.
    ///
    /// Each entry is adjusted to what its storage call did: deleted keys are
    /// dropped, updated aggregates re-baseline their original version and
    /// inserted ones become selected. The first failure of a phase is
    /// returned after the rest of that phase settled; later phases do not
    /// run. Events of every successful call are pushed to `sink`.
    pub async fn commit<P: Persistence<A>>(
        &mut self,
        persistence: &P,
        cancel: &CancellationToken,
        sink: &mut Vec<RecordOf<A>>,
    ) -> Result<FlushStats> {
        let ChangeSet {
            deletes,
            updates,
            inserts,
        } = self.change_set().await;
        let mut stats = FlushStats::default();

        let deleted = join_all(deletes.into_iter().map(|(key, delete)| async move {
            let result = if cancel.is_cancelled() {
                Err(RepositoryError::Cancelled)
            } else {
                match delete {
                    Some(delete) => delete(key.clone()).await,
                    None => persistence.delete(&key).await,
                }
            };
            (key, result)
        }))
        .await;

        let mut failure = None;
        for (key, result) in deleted {
            match result {
                Ok(()) => {
                    self.entries.remove(&key);
                    stats.deleted += 1;
                }
                Err(error) => {
                    failure.get_or_insert(error);
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let updated = join_all(
            updates
                .into_iter()
                .map(|(key, handle, original_version)| async move {
                    let result = if cancel.is_cancelled() {
                        Err(RepositoryError::Cancelled)
                    } else {
                        let mut aggregate = handle.write().await;
                        persistence
                            .update(&mut *aggregate, original_version)
                            .await
                            .map(|events| (aggregate.version(), events))
                    };
                    (key, result)
                }),
        )
        .await;

        for (key, result) in updated {
            match result {
                Ok((version, events)) => {
                    if let Some(Tracked::Selected {
                        original_version, ..
                    }) = self.entries.get_mut(&key)
                    {
                        *original_version = version;
                    }
                    sink.extend(events);
                    stats.updated += 1;
                }
                Err(error) => {
                    failure.get_or_insert(error);
                }
            }
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let inserted = join_all(inserts.into_iter().map(|(key, handle)| async move {
            let result = if cancel.is_cancelled() {
                Err(RepositoryError::Cancelled)
            } else {
                let mut aggregate = handle.write().await;
                persistence
                    .insert(&mut *aggregate)
                    .await
                    .map(|events| (aggregate.version(), events))
            };
            (key, handle, result)
        }))
        .await;

        for (key, handle, result) in inserted {
            match result {
                Ok((version, events)) => {
                    self.entries.insert(key, Tracked::selected(handle, version));
                    sink.extend(events);
                    stats.inserted += 1;
                }
                Err(error) => {
                    failure.get_or_insert(error);
                }
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(stats),
        }
    }
}

impl<A: AggregateRoot> std::fmt::Debug for AggregateSet<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k, v.state())))
            .finish()
    }
}
