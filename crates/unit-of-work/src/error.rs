//! Repository and unit-of-work error types.

use common::AggregateKey;
use domain::{AggregateRoot, DomainError};
use event_store::{EventStoreError, Version};
use thiserror::Error;

/// Errors surfaced by repositories and their flushes.
///
/// All of them are recoverable from the caller's point of view; a unit of
/// work passes them through unchanged.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The key is unknown to the store or was removed in this session.
    #[error("Aggregate not found: {aggregate_type} {key}")]
    AggregateNotFound {
        aggregate_type: &'static str,
        key: String,
    },

    /// Another aggregate with the same key is tracked or already stored.
    #[error("Duplicate key: {aggregate_type} {key}")]
    DuplicateKey {
        aggregate_type: &'static str,
        key: String,
    },

    /// The stored version moved since the aggregate was loaded.
    #[error(
        "Concurrency conflict on {aggregate_type} {key}: expected version {expected}, found {actual:?}"
    )]
    ConcurrencyConflict {
        aggregate_type: &'static str,
        key: String,
        expected: Version,
        actual: Option<Version>,
    },

    /// The stored history could not be turned back into an aggregate.
    #[error("Could not restore {aggregate_type} {key}: {reason}")]
    CouldNotRestoreAggregate {
        aggregate_type: &'static str,
        key: String,
        reason: String,
    },

    /// The backend does not implement the operation.
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// The repository or its unit of work has been disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),

    /// The unit of work was cancelled before the operation reached storage.
    #[error("Operation cancelled")]
    Cancelled,

    /// A caller passed an argument the operation cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An aggregate rule was violated.
    #[error("Domain error: {0}")]
    Domain(DomainError),

    /// An error occurred in the storage layer.
    #[error("Event store error: {0}")]
    Storage(EventStoreError),

    /// A flush-group transaction boundary failed.
    #[error("Transaction boundary `{group}` failed: {reason}")]
    Boundary { group: String, reason: String },
}

impl RepositoryError {
    pub fn not_found<K: AggregateKey>(aggregate_type: &'static str, key: &K) -> Self {
        Self::AggregateNotFound {
            aggregate_type,
            key: key.to_string(),
        }
    }

    pub fn duplicate<K: AggregateKey>(aggregate_type: &'static str, key: &K) -> Self {
        Self::DuplicateKey {
            aggregate_type,
            key: key.to_string(),
        }
    }

    /// Translates a storage failure for aggregate `key` of type `A`.
    pub fn from_storage<A: AggregateRoot>(key: &A::Key, error: EventStoreError) -> Self {
        match error {
            EventStoreError::ConcurrencyConflict {
                expected, actual, ..
            } => Self::ConcurrencyConflict {
                aggregate_type: A::aggregate_type(),
                key: key.to_string(),
                expected,
                actual,
            },
            EventStoreError::DuplicateStream(_) => Self::duplicate(A::aggregate_type(), key),
            EventStoreError::NotSupported(operation) => Self::NotSupported(operation),
            other => Self::Storage(other),
        }
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<DomainError> for RepositoryError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::CouldNotRestoreAggregate {
                aggregate_type,
                key,
                reason,
            } => Self::CouldNotRestoreAggregate {
                aggregate_type,
                key,
                reason,
            },
            DomainError::RestoreFailed {
                aggregate_type,
                key,
                expected,
                found,
            } => Self::CouldNotRestoreAggregate {
                aggregate_type,
                key,
                reason: format!("snapshot of type `{found}` where `{expected}` was expected"),
            },
            DomainError::InvalidArgument(reason) => Self::InvalidArgument(reason),
            DomainError::EventStore(EventStoreError::NotSupported(operation)) => {
                Self::NotSupported(operation)
            }
            DomainError::EventStore(inner) => Self::Storage(inner),
            other => Self::Domain(other),
        }
    }
}

impl From<EventStoreError> for RepositoryError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::NotSupported(operation) => Self::NotSupported(operation),
            other => Self::Storage(other),
        }
    }
}

/// Errors raised by a unit of work itself.
#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// `complete` was called on a scope that is already completing.
    #[error("Unit of work {0} is already completing")]
    AlreadyCompleting(uuid::Uuid),

    /// The scope has been completed or disposed.
    #[error("Unit of work {0} has been disposed")]
    Disposed(uuid::Uuid),

    /// A repository failed while the scope flushed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl UnitOfWorkError {
    /// The repository error behind a failed flush, if that is what failed.
    pub fn repository_error(&self) -> Option<&RepositoryError> {
        match self {
            Self::Repository(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
