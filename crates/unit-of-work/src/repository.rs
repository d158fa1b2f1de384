//! Repository: identity map plus persistence strategy for one aggregate type.

use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use domain::AggregateRoot;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::aggregate_set::{AggregateSet, DeleteDelegate, FlushStats, Tracked};
use crate::bus::PublishedEvent;
use crate::context::{UnitOfWork, WeakUnitOfWork};
use crate::error::{RepositoryError, Result};
use crate::flush::{Flush, FlushGroup};
use crate::handle::AggregateHandle;
use crate::persistence::Persistence;

/// Per-repository overrides of the scope defaults.
#[derive(Debug, Clone, Default)]
pub struct RepositoryOptions {
    /// Overrides [`UnitOfWorkConfig::auto_enlist`](crate::UnitOfWorkConfig).
    pub auto_enlist: Option<bool>,
    /// Group this repository flushes with.
    pub group: Option<FlushGroup>,
}

impl RepositoryOptions {
    pub fn auto_enlist(mut self, enabled: bool) -> Self {
        self.auto_enlist = Some(enabled);
        self
    }

    pub fn group(mut self, group: FlushGroup) -> Self {
        self.group = Some(group);
        self
    }
}

struct RepositoryState<A: AggregateRoot> {
    set: AggregateSet<A>,
    disposed: bool,
}

/// Tracks the aggregates of type `A` loaded or created in one session and
/// writes their changes through `P`.
///
/// Every public operation holds the repository's guard for its whole
/// duration, so operations on one instance never interleave. The same key
/// always yields the same [`AggregateHandle`] while it is tracked.
///
/// A repository created in a [`UnitOfWork`] enlists with it on first use
/// and publishes the events of each successful flush there. Once the
/// repository or its scope is disposed every operation fails with
/// [`RepositoryError::Disposed`].
pub struct Repository<A: AggregateRoot, P> {
    this: Weak<Self>,
    name: String,
    persistence: P,
    scope: Option<WeakUnitOfWork>,
    options: RepositoryOptions,
    cancel: CancellationToken,
    state: Mutex<RepositoryState<A>>,
}

impl<A: AggregateRoot, P: Persistence<A>> Repository<A, P> {
    /// A repository outside any unit of work. Changes are written only by
    /// calling [`flush`](Self::flush) and no events are published.
    pub fn new(persistence: P) -> Arc<Self> {
        Self::with_options(None, persistence, RepositoryOptions::default())
    }

    /// A repository that enlists with `scope` and is flushed when it
    /// completes.
    pub fn in_scope(scope: &UnitOfWork, persistence: P) -> Arc<Self> {
        Self::with_options(Some(scope), persistence, RepositoryOptions::default())
    }

    /// Creates a repository with explicit options, optionally bound to a scope.
    pub fn with_options(
        scope: Option<&UnitOfWork>,
        persistence: P,
        options: RepositoryOptions,
    ) -> Arc<Self> {
        let cancel = scope
            .map(UnitOfWork::cancellation_token)
            .unwrap_or_default();
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name: format!("repository<{}>", A::aggregate_type()),
            persistence,
            scope: scope.map(UnitOfWork::downgrade),
            options,
            cancel,
            state: Mutex::new(RepositoryState {
                set: AggregateSet::new(),
                disposed: false,
            }),
        })
    }

    /// Returns the persistence strategy this repository writes through.
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn scope(&self) -> Option<UnitOfWork> {
        self.scope.as_ref().and_then(WeakUnitOfWork::upgrade)
    }

    /// Acquires the guard, failing if this repository or its scope is gone.
    async fn guard(&self) -> Result<MutexGuard<'_, RepositoryState<A>>> {
        let state = self.state.lock().await;
        if state.disposed {
            return Err(RepositoryError::Disposed("repository"));
        }
        if let Some(weak) = &self.scope {
            match weak.upgrade() {
                Some(scope) if !scope.is_disposed() => {}
                _ => return Err(RepositoryError::Disposed("unit of work")),
            }
        }
        Ok(state)
    }

    async fn enlist(&self) -> Result<()> {
        let Some(scope) = self.scope() else {
            return Ok(());
        };
        let auto_enlist = self
            .options
            .auto_enlist
            .unwrap_or(scope.config().auto_enlist);
        if !auto_enlist {
            return Ok(());
        }
        if let Some(this) = self.this.upgrade() {
            scope.enlist(this).await?;
        }
        Ok(())
    }

    /// Returns the tracked aggregate for `key`, loading it on first access.
    ///
    /// Fails with `AggregateNotFound` if the key is unknown to storage or was
    /// removed in this session, and with `Cancelled` if the scope is
    /// cancelled while loading.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn get_by_key(&self, key: &A::Key) -> Result<AggregateHandle<A>> {
        let mut state = self.guard().await?;
        if let Some(tracked) = state.set.try_get(key) {
            return match tracked.handle() {
                Some(handle) => {
                    tracing::debug!(%key, "identity map hit");
                    Ok(handle.clone())
                }
                None => Err(RepositoryError::not_found(A::aggregate_type(), key)),
            };
        }

        let loaded = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(RepositoryError::Cancelled),
            loaded = self.persistence.select_by_key(key) => loaded?,
        };
        let Some(aggregate) = loaded else {
            return Err(RepositoryError::not_found(A::aggregate_type(), key));
        };

        let version = aggregate.version();
        let handle = AggregateHandle::new(aggregate);
        state
            .set
            .add(key.clone(), Tracked::selected(handle.clone(), version))?;
        drop(state);

        self.enlist().await?;
        Ok(handle)
    }

    /// Tracks a new aggregate for insertion on the next flush.
    ///
    /// Adding the handle that is already tracked is a no-op. Any other
    /// aggregate under a tracked key, including a removed one, fails with
    /// `DuplicateKey`.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_type = A::aggregate_type()))]
    pub async fn add(
        &self,
        aggregate: impl Into<AggregateHandle<A>> + Send,
    ) -> Result<AggregateHandle<A>> {
        let handle = aggregate.into();
        let key = handle.read().await.key().clone();

        let mut state = self.guard().await?;
        if let Some(tracked) = state.set.try_get(&key) {
            if tracked.handle().is_some_and(|h| h.ptr_eq(&handle)) {
                return Ok(handle);
            }
            return Err(RepositoryError::duplicate(A::aggregate_type(), &key));
        }
        state.set.add(key, Tracked::added(handle.clone()))?;
        drop(state);

        self.enlist().await?;
        Ok(handle)
    }

    /// Schedules `key` for deletion on the next flush.
    ///
    /// A loaded aggregate turns into a pending delete, an added one is
    /// forgotten since it was never stored, and removing twice is a no-op.
    pub async fn remove_by_key(&self, key: &A::Key) -> Result<()> {
        self.remove_entry(key, None, None).await
    }

    /// Like [`remove_by_key`](Self::remove_by_key), deleting through
    /// `delete` instead of the strategy.
    pub async fn remove_by_key_with(
        &self,
        key: &A::Key,
        delete: DeleteDelegate<A::Key>,
    ) -> Result<()> {
        self.remove_entry(key, Some(delete), None).await
    }

    /// Schedules the aggregate behind `aggregate` for deletion.
    ///
    /// Fails with `InvalidArgument` when another instance is tracked under
    /// the same key, leaving that instance untouched.
    pub async fn remove(&self, aggregate: &AggregateHandle<A>) -> Result<()> {
        let key = aggregate.read().await.key().clone();
        self.remove_entry(&key, None, Some(aggregate)).await
    }

    #[tracing::instrument(skip(self, delete, expected), fields(aggregate_type = A::aggregate_type()))]
    async fn remove_entry(
        &self,
        key: &A::Key,
        delete: Option<DeleteDelegate<A::Key>>,
        expected: Option<&AggregateHandle<A>>,
    ) -> Result<()> {
        let mut state = self.guard().await?;
        if let Some(expected) = expected
            && let Some(tracked) = state.set.try_get(key)
            && tracked.handle().is_some_and(|h| !h.ptr_eq(expected))
        {
            return Err(RepositoryError::InvalidArgument(format!(
                "{} {key} is tracked as another instance",
                A::aggregate_type()
            )));
        }
        let newly_tracked = match state.set.remove_by_key(key) {
            Some(Tracked::Selected { .. }) => {
                state
                    .set
                    .replace(key.clone(), Tracked::removed(key.clone(), delete));
                false
            }
            Some(Tracked::Added { .. }) => {
                tracing::debug!(%key, "unsaved aggregate discarded");
                false
            }
            Some(removed @ Tracked::Removed { .. }) => {
                state.set.replace(key.clone(), removed);
                false
            }
            None => {
                state
                    .set
                    .replace(key.clone(), Tracked::removed(key.clone(), delete));
                true
            }
        };
        drop(state);

        if newly_tracked {
            self.enlist().await?;
        }
        Ok(())
    }

    /// Returns true if a flush would write anything.
    pub async fn requires_flush(&self) -> Result<bool> {
        Ok(self.guard().await?.set.has_updates().await)
    }

    /// Number of writes the next flush would perform.
    pub async fn pending_changes(&self) -> Result<usize> {
        Ok(self.guard().await?.set.count_updated().await)
    }

    /// Number of keys tracked, pending deletes included.
    pub async fn tracked_count(&self) -> Result<usize> {
        Ok(self.guard().await?.set.len())
    }

    /// Writes pending deletes, updates and inserts, in that order.
    ///
    /// Events of every storage call that succeeded are handed to the scope
    /// for publication, even when a later call fails.
    #[tracing::instrument(skip(self), fields(aggregate_type = A::aggregate_type()))]
    pub async fn flush(&self) -> Result<FlushStats> {
        let mut state = self.guard().await?;
        let started = Instant::now();
        let mut committed = Vec::new();

        let result = state
            .set
            .commit(&self.persistence, &self.cancel, &mut committed)
            .await;

        metrics::counter!("repository_flushes_total").increment(1);
        metrics::histogram!("repository_flush_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if let Err(error) = &result
            && error.is_concurrency_conflict()
        {
            metrics::counter!("repository_concurrency_conflicts_total").increment(1);
            tracing::warn!(error = %error, "concurrency conflict during flush");
        }

        match self.scope() {
            Some(scope) => {
                for record in committed {
                    scope
                        .bus()
                        .publish(Some(&scope), PublishedEvent::from_record::<A>(record));
                }
            }
            None if !committed.is_empty() => {
                tracing::debug!(events = committed.len(), "no scope, events not published");
            }
            None => {}
        }

        if let Ok(stats) = &result {
            tracing::debug!(
                deleted = stats.deleted,
                updated = stats.updated,
                inserted = stats.inserted,
                "repository flushed"
            );
        }
        result
    }

    /// Marks the repository unusable and forgets every tracked aggregate.
    pub async fn dispose(&self) {
        let mut state = self.state.lock().await;
        if !state.disposed {
            state.disposed = true;
            state.set.clear();
            tracing::debug!(repository = %self.name, "repository disposed");
        }
    }

    /// Returns true once [`dispose`](Self::dispose) has run.
    pub async fn is_disposed(&self) -> bool {
        self.state.lock().await.disposed
    }
}

#[async_trait]
impl<A: AggregateRoot, P: Persistence<A>> Flush for Repository<A, P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn group(&self) -> Option<&FlushGroup> {
        self.options.group.as_ref()
    }

    async fn requires_flush(&self) -> Result<bool> {
        if self.is_disposed().await {
            return Ok(false);
        }
        Repository::requires_flush(self).await
    }

    async fn flush(&self) -> Result<()> {
        if self.is_disposed().await {
            return Ok(());
        }
        Repository::flush(self).await.map(|_| ())
    }
}
