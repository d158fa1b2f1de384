use thiserror::Error;

use crate::{StreamId, Version};

/// Errors that can occur when interacting with a storage backend.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The optimistic version check failed.
    /// The stored version did not match the version the writer started from.
    #[error("Concurrency conflict for {stream}: expected version {expected}, found {actual:?}")]
    ConcurrencyConflict {
        stream: StreamId,
        expected: Version,
        actual: Option<Version>,
    },

    /// An insert targeted a stream or snapshot that already exists.
    #[error("Stream already exists: {0}")]
    DuplicateStream(StreamId),

    /// The stream was not found in the store.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    /// A runtime type token has no registered storage contract.
    #[error("No contract registered for type `{0}`")]
    UnknownContract(String),

    /// A storage contract name has no registered runtime type.
    #[error("No type registered for contract `{0}`")]
    UnknownType(String),

    /// An obsolete record has no upcaster that can move it forward.
    #[error("No upcaster for contract `{contract}` at schema version {schema_version}")]
    MissingUpcaster {
        contract: String,
        schema_version: u32,
    },

    /// An upcaster produced a record that is not newer than its input,
    /// or a record claims a schema newer than the registered one.
    #[error("Invalid schema upgrade for contract `{contract}`: {reason}")]
    InvalidUpcast { contract: String, reason: String },

    /// The backend does not implement this operation.
    #[error("Operation not supported by this store: {0}")]
    NotSupported(&'static str),

    /// The events handed to the store do not form a valid batch.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A record builder was missing a required field.
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
