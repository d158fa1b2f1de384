use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

use crate::aggregate::AggregateRoot;
use crate::error::Result;

/// Serializable capture of an aggregate's state at one version.
///
/// Any aggregate that is itself `Clone + Serialize + DeserializeOwned` is its
/// own memento; aggregates that keep transient state declare a dedicated type.
pub trait Memento<A>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type token of the memento, mapped to a storage contract.
    fn memento_type() -> &'static str;

    /// Captures the current state of `aggregate`.
    fn capture(aggregate: &A) -> Self;

    /// Version of the aggregate when the memento was taken.
    fn memento_version(&self) -> Version;

    /// Rebuilds the aggregate.
    fn into_aggregate(self) -> Result<A>;
}

impl<A> Memento<A> for A
where
    A: AggregateRoot + Clone + Serialize + DeserializeOwned,
{
    fn memento_type() -> &'static str {
        A::aggregate_type()
    }

    fn capture(aggregate: &A) -> Self {
        aggregate.clone()
    }

    fn memento_version(&self) -> Version {
        self.version()
    }

    fn into_aggregate(self) -> Result<A> {
        Ok(self)
    }
}
