//! Unit-of-work scope: one per logical call chain.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{DomainEventBus, PublishedEvent};
use crate::config::UnitOfWorkConfig;
use crate::error::{RepositoryError, Result, UnitOfWorkError};
use crate::flush::{Flush, FlushController};

type Shared = Arc<dyn Any + Send + Sync>;

/// Lifecycle of a unit of work. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Active,
    Completing,
    Disposed,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Completing,
            _ => Self::Disposed,
        }
    }
}

/// Opaque key for values cached on a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheToken(Uuid);

impl CacheToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CacheToken {
    fn default() -> Self {
        Self::new()
    }
}

struct Inner {
    id: Uuid,
    phase: AtomicU8,
    config: UnitOfWorkConfig,
    bus: DomainEventBus,
    controller: tokio::sync::Mutex<FlushController>,
    messages: Mutex<Vec<Shared>>,
    cache: Mutex<HashMap<CacheToken, Shared>>,
    events: Mutex<Vec<(DomainEventBus, PublishedEvent)>>,
    cancellation: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared state of one logical call chain.
///
/// Repositories created in the scope enlist with its [`FlushController`];
/// [`complete`](Self::complete) flushes them in registration order and then
/// releases the events they produced to the [`DomainEventBus`]. Clones refer
/// to the same scope.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<Inner>,
}

impl UnitOfWork {
    /// Creates an active unit of work publishing through `bus`.
    ///
    /// Prefer [`UnitOfWorkFactory::enter`], which also disposes on drop.
    pub fn new(bus: DomainEventBus, config: UnitOfWorkConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                phase: AtomicU8::new(Phase::Active as u8),
                config,
                bus,
                controller: tokio::sync::Mutex::new(FlushController::new()),
                messages: Mutex::new(Vec::new()),
                cache: Mutex::new(HashMap::new()),
                events: Mutex::new(Vec::new()),
                cancellation: CancellationToken::new(),
            }),
        }
    }

    /// Returns the unique id of this unit of work.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the configuration the unit of work was created with.
    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.inner.config
    }

    /// Returns the bus that receives events after a successful flush.
    pub fn bus(&self) -> &DomainEventBus {
        &self.inner.bus
    }

    /// Returns the current lifecycle phase.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Active
    }

    pub fn is_disposed(&self) -> bool {
        self.phase() == Phase::Disposed
    }

    /// Registers a flush participant.
    ///
    /// Returns false if it was already registered or the scope is completing;
    /// fails once the scope is disposed.
    pub async fn enlist(&self, participant: Arc<dyn Flush>) -> Result<bool> {
        match self.phase() {
            Phase::Active => {}
            Phase::Completing => {
                tracing::warn!(
                    uow = %self.inner.id,
                    participant = participant.name(),
                    "enlist ignored while completing"
                );
                return Ok(false);
            }
            Phase::Disposed => return Err(RepositoryError::Disposed("unit of work")),
        }

        let enlisted = self.inner.controller.lock().await.enlist(Arc::clone(&participant));
        if enlisted {
            tracing::debug!(uow = %self.inner.id, participant = participant.name(), "enlisted");
        }
        Ok(enlisted)
    }

    /// Returns true if any enlisted participant has pending writes.
    pub async fn requires_flush(&self) -> Result<bool> {
        if self.is_disposed() {
            return Err(RepositoryError::Disposed("unit of work"));
        }
        self.inner.controller.lock().await.requires_flush().await
    }

    /// Flushes every enlisted participant and, if that succeeded, delivers
    /// the queued events. The scope is disposed afterwards either way.
    #[tracing::instrument(skip(self), fields(uow = %self.inner.id))]
    pub async fn complete(&self) -> std::result::Result<(), UnitOfWorkError> {
        if let Err(current) = self.inner.phase.compare_exchange(
            Phase::Active as u8,
            Phase::Completing as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            return Err(match Phase::from_u8(current) {
                Phase::Completing => UnitOfWorkError::AlreadyCompleting(self.inner.id),
                _ => UnitOfWorkError::Disposed(self.inner.id),
            });
        }

        let controller = std::mem::take(&mut *self.inner.controller.lock().await);
        let result = controller.flush().await;
        self.inner
            .phase
            .store(Phase::Disposed as u8, Ordering::SeqCst);
        lock(&self.inner.cache).clear();
        let events = std::mem::take(&mut *lock(&self.inner.events));

        match result {
            Ok(()) => {
                let queued = events.len();
                for (bus, event) in events {
                    bus.deliver(&event).await;
                }
                metrics::counter!("unit_of_work_completed_total").increment(1);
                tracing::info!(
                    participants = controller.len(),
                    events = queued,
                    "unit of work completed"
                );
                Ok(())
            }
            Err(error) => {
                metrics::counter!("unit_of_work_failed_total").increment(1);
                metrics::counter!("domain_events_dropped_total").increment(events.len() as u64);
                tracing::warn!(error = %error, dropped = events.len(), "unit of work failed");
                Err(error.into())
            }
        }
    }

    /// Ends the scope without flushing. Queued events are discarded.
    pub fn dispose(&self) {
        let previous = self
            .inner
            .phase
            .swap(Phase::Disposed as u8, Ordering::SeqCst);
        if Phase::from_u8(previous) == Phase::Disposed {
            return;
        }

        let dropped = std::mem::take(&mut *lock(&self.inner.events)).len();
        if dropped > 0 {
            metrics::counter!("domain_events_dropped_total").increment(dropped as u64);
        }
        if let Ok(mut controller) = self.inner.controller.try_lock() {
            *controller = FlushController::new();
        }
        lock(&self.inner.cache).clear();
        tracing::debug!(uow = %self.inner.id, dropped, "unit of work disposed");
    }

    /// Cancels pending reads and the storage calls a flush has not started.
    pub fn cancel(&self) {
        self.inner.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancellation.clone()
    }

    /// Pushes the message being handled onto the message stack.
    pub fn push_message<M: Any + Send + Sync>(&self, message: M) {
        lock(&self.inner.messages).push(Arc::new(message));
    }

    /// Pops the innermost message, if any.
    pub fn pop_message(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        lock(&self.inner.messages).pop()
    }

    /// The innermost in-flight message, if it is an `M`.
    pub fn current_message<M: Any + Send + Sync>(&self) -> Option<Arc<M>> {
        let top = lock(&self.inner.messages).last().cloned()?;
        top.downcast::<M>().ok()
    }

    /// Returns the number of messages on the stack.
    pub fn message_depth(&self) -> usize {
        lock(&self.inner.messages).len()
    }

    /// Returns the value cached under `token`, creating it with `init` on
    /// first use. A token reused with another type replaces the entry.
    pub fn cached<T, F>(&self, token: &CacheToken, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut cache = lock(&self.inner.cache);
        if let Some(existing) = cache.get(token)
            && let Ok(value) = Arc::clone(existing).downcast::<T>()
        {
            return value;
        }
        let value = Arc::new(init());
        cache.insert(*token, Arc::clone(&value) as Shared);
        value
    }

    /// Returns a weak reference that does not keep the unit of work alive.
    pub fn downgrade(&self) -> WeakUnitOfWork {
        WeakUnitOfWork {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Queues an event for delivery after a successful flush. Refused once
    /// the scope is disposed.
    pub(crate) fn defer_event(&self, bus: DomainEventBus, event: PublishedEvent) -> bool {
        if self.is_disposed() {
            tracing::debug!(
                uow = %self.inner.id,
                event_type = event.event_type,
                "scope disposed, event dropped"
            );
            return false;
        }
        lock(&self.inner.events).push((bus, event));
        true
    }

    /// Number of events waiting for the flush to finish.
    pub fn pending_event_count(&self) -> usize {
        lock(&self.inner.events).len()
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

/// Non-owning reference to a [`UnitOfWork`], held by repositories.
#[derive(Clone)]
pub struct WeakUnitOfWork {
    inner: Weak<Inner>,
}

impl WeakUnitOfWork {
    pub fn upgrade(&self) -> Option<UnitOfWork> {
        self.inner.upgrade().map(|inner| UnitOfWork { inner })
    }
}

/// Creates scopes sharing one bus and configuration.
#[derive(Debug, Clone, Default)]
pub struct UnitOfWorkFactory {
    bus: DomainEventBus,
    config: UnitOfWorkConfig,
}

impl UnitOfWorkFactory {
    pub fn new(bus: DomainEventBus) -> Self {
        Self {
            bus,
            config: UnitOfWorkConfig::default(),
        }
    }

    pub fn with_config(mut self, config: UnitOfWorkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn bus(&self) -> &DomainEventBus {
        &self.bus
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Joins `parent` if it is still usable, otherwise starts a new scope
    /// that this call chain owns.
    pub fn enter(&self, parent: Option<&UnitOfWork>) -> Scope {
        match parent {
            Some(parent) if !parent.is_disposed() => Scope {
                uow: parent.clone(),
                owning: false,
                finished: false,
            },
            _ => Scope {
                uow: UnitOfWork::new(self.bus.clone(), self.config.clone()),
                owning: true,
                finished: false,
            },
        }
    }
}

/// A unit of work entered by one call in the chain.
///
/// Only the owning scope flushes on [`complete`](Self::complete). Dropping an
/// owning scope without completing it disposes the unit of work.
pub struct Scope {
    uow: UnitOfWork,
    owning: bool,
    finished: bool,
}

impl Scope {
    pub fn is_owning(&self) -> bool {
        self.owning
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    pub async fn complete(mut self) -> std::result::Result<(), UnitOfWorkError> {
        self.finished = true;
        if self.owning {
            self.uow.complete().await
        } else {
            Ok(())
        }
    }
}

impl std::ops::Deref for Scope {
    type Target = UnitOfWork;

    fn deref(&self) -> &UnitOfWork {
        &self.uow
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.owning && !self.finished && self.uow.is_active() {
            tracing::warn!(uow = %self.uow.id(), "scope dropped without completing, disposing");
            self.uow.dispose();
        }
    }
}
