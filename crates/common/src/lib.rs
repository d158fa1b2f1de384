//! Shared identifier types for the persistence workspace.

mod types;

pub use types::{AggregateId, AggregateKey};
