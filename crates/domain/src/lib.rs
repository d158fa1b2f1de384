//! Domain layer of the persistence engine.
//!
//! This crate provides the aggregate-side abstractions:
//! - `AggregateRoot` for event-applying entities with a pending-event buffer
//! - `DomainEvent` for the facts aggregates publish
//! - `Handlers`, the per-type table mapping event types to state transitions
//! - `Memento` for snapshot state
//! - `RecordCodec` and `EventStreamHistory` for turning stored records back
//!   into aggregates

pub mod aggregate;
pub mod codec;
pub mod error;
pub mod handlers;
pub mod history;
pub mod memento;

#[cfg(test)]
mod fixtures;

pub use aggregate::{AggregateRoot, DomainEvent, EventRecord, PendingEvents, RecordOf};
pub use codec::RecordCodec;
pub use error::{DomainError, Result};
pub use handlers::{Handler, Handlers};
pub use history::EventStreamHistory;
pub use memento::Memento;
