//! Storage-level contract for the aggregate persistence engine.
//!
//! This crate knows nothing about aggregates. It defines the records a
//! backend stores (events, snapshots, histories), the type↔contract mapping
//! and schema upcasting used to evolve them, the two backend traits the
//! repositories are written against, and in-memory implementations of both.

pub mod contract;
pub mod error;
pub mod event;
pub mod memory;
pub mod snapshot;
pub mod store;
pub mod upcast;

pub use contract::{Contract, ContractMap, ContractRegistry};
pub use error::{EventStoreError, Result};
pub use event::{EventId, StoredEvent, StoredEventBuilder, StreamId, Version};
pub use memory::{InMemoryEventStore, InMemorySnapshotStore, StoreStats};
pub use snapshot::{History, StoredSnapshot};
pub use store::{EventStore, SnapshotStore};
pub use upcast::{FnUpcaster, SchemaPayload, Upcaster, UpcasterChain};
