//! Translation between aggregate-level records and storage records.

use std::sync::Arc;

use event_store::{ContractMap, StoredEvent, StoredSnapshot, StreamId, UpcasterChain};

use crate::aggregate::{AggregateRoot, DomainEvent, EventRecord, RecordOf};
use crate::error::{DomainError, Result};
use crate::memento::Memento;

/// Encodes events and mementos under their storage contracts and decodes
/// stored records back, upgrading old schemas on the way.
#[derive(Clone)]
pub struct RecordCodec {
    contracts: Arc<dyn ContractMap>,
    upcasters: Arc<UpcasterChain>,
}

impl RecordCodec {
    pub fn new(contracts: impl ContractMap + 'static) -> Self {
        Self {
            contracts: Arc::new(contracts),
            upcasters: Arc::new(UpcasterChain::new()),
        }
    }

    pub fn with_upcasters(mut self, upcasters: UpcasterChain) -> Self {
        self.upcasters = Arc::new(upcasters);
        self
    }

    pub fn contracts(&self) -> &dyn ContractMap {
        self.contracts.as_ref()
    }

    /// Stream holding the records of aggregate `key`.
    pub fn stream_id<A: AggregateRoot>(&self, key: &A::Key) -> Result<StreamId> {
        let contract = self.contracts.require_contract(A::aggregate_type())?;
        Ok(StreamId::new(contract.name, key))
    }

    pub fn encode_event<A: AggregateRoot>(
        &self,
        stream: &StreamId,
        record: &RecordOf<A>,
    ) -> Result<StoredEvent> {
        let contract = self
            .contracts
            .require_contract(record.event.event_type())?;

        Ok(StoredEvent::builder()
            .event_id(record.event_id)
            .stream(stream.clone())
            .version(record.version)
            .contract(contract.name, contract.schema_version)
            .timestamp(record.timestamp)
            .payload_raw(record.event.to_payload()?)
            .build()?)
    }

    /// Upgrades and decodes a stored event for aggregate `key`.
    pub fn decode_event<A: AggregateRoot>(
        &self,
        key: &A::Key,
        stored: StoredEvent,
    ) -> Result<RecordOf<A>> {
        if stored.stream.key != key.to_string() {
            return Err(DomainError::InvalidArgument(format!(
                "event {} belongs to stream {}",
                stored.event_id, stored.stream
            )));
        }

        let upgraded = self.upcasters.upgrade_event(self.contracts(), stored)?;
        let event_type = self.contracts.require_type(&upgraded.contract)?;
        let event = A::Event::from_payload(&event_type, upgraded.payload)?;

        Ok(EventRecord {
            event_id: upgraded.event_id,
            key: key.clone(),
            version: upgraded.version,
            timestamp: upgraded.timestamp,
            event,
        })
    }

    /// Captures `aggregate` as a stored snapshot.
    pub fn encode_snapshot<A: AggregateRoot>(
        &self,
        stream: &StreamId,
        aggregate: &A,
    ) -> Result<StoredSnapshot> {
        let memento = aggregate.create_snapshot();
        let contract = self
            .contracts
            .require_contract(<A::Snapshot as Memento<A>>::memento_type())?;

        Ok(StoredSnapshot::from_state(
            stream.clone(),
            memento.memento_version(),
            contract.name,
            contract.schema_version,
            &memento,
        )?)
    }

    /// Upgrades a stored snapshot and rebuilds the aggregate from it.
    ///
    /// A snapshot whose contract maps to another memento type fails with
    /// [`DomainError::RestoreFailed`].
    pub fn decode_snapshot<A: AggregateRoot>(&self, stored: StoredSnapshot) -> Result<A> {
        let upgraded = self.upcasters.upgrade_snapshot(self.contracts(), stored)?;
        let expected = <A::Snapshot as Memento<A>>::memento_type();
        let found = self.contracts.require_type(&upgraded.contract)?;
        if found != expected {
            return Err(DomainError::RestoreFailed {
                aggregate_type: A::aggregate_type(),
                key: upgraded.stream.key,
                expected: expected.to_string(),
                found,
            });
        }

        let memento: A::Snapshot = serde_json::from_value(upgraded.state)?;
        memento.into_aggregate()
    }
}

impl std::fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCodec")
            .field("upcasters", &self.upcasters)
            .finish_non_exhaustive()
    }
}
