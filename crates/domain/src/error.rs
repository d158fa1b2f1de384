//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

/// Errors raised by aggregates and by rebuilding them from storage.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An event did not fit the aggregate's identity: wrong key or a version
    /// that does not move forward.
    #[error("Versioning error on {aggregate_type} {key}: {reason}")]
    Versioning {
        aggregate_type: &'static str,
        key: String,
        reason: String,
    },

    /// The aggregate registered no handler for this event type.
    #[error("No handler on {aggregate_type} for event type `{event_type}`")]
    UnhandledEvent {
        aggregate_type: &'static str,
        event_type: String,
    },

    /// Replaying a stored history failed.
    #[error("Could not restore {aggregate_type} {key}: {reason}")]
    CouldNotRestoreAggregate {
        aggregate_type: &'static str,
        key: String,
        reason: String,
    },

    /// A snapshot decoded into a type other than the expected memento.
    #[error("Snapshot of type `{found}` cannot restore {aggregate_type} {key}: expected `{expected}`")]
    RestoreFailed {
        aggregate_type: &'static str,
        key: String,
        expected: String,
        found: String,
    },

    /// A caller passed an argument the operation cannot work with.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An error occurred in the storage layer.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;
