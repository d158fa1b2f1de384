//! Repositories and unit-of-work coordination.
//!
//! This crate provides:
//! - [`Repository`], an identity map over one aggregate type that turns
//!   tracked changes into inserts, updates and deletes
//! - [`EventSourced`] and [`Snapshotting`], the two [`Persistence`]
//!   strategies a repository writes through
//! - [`UnitOfWork`] with its [`FlushController`], which flushes every
//!   enlisted repository once per logical call chain
//! - [`DomainEventBus`], which hands committed events to listeners after the
//!   owning unit of work flushed

pub mod aggregate_set;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod event_sourced;
pub mod flush;
pub mod handle;
pub mod persistence;
pub mod repository;
pub mod snapshotting;

#[cfg(test)]
mod testing;

pub use aggregate_set::{AggregateSet, ChangeSet, DeleteDelegate, FlushStats, Tracked};
pub use bus::{DomainEventBus, EventListener, ListenerError, PublishedEvent};
pub use config::UnitOfWorkConfig;
pub use context::{CacheToken, Phase, Scope, UnitOfWork, UnitOfWorkFactory, WeakUnitOfWork};
pub use error::{RepositoryError, Result, UnitOfWorkError};
pub use event_sourced::{EventSourced, SnapshotPolicy};
pub use flush::{Flush, FlushController, FlushGroup, NoTransaction, TransactionBoundary};
pub use handle::AggregateHandle;
pub use persistence::Persistence;
pub use repository::{Repository, RepositoryOptions};
pub use snapshotting::Snapshotting;
