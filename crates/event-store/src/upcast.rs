//! Schema upgrades for stored events and snapshots.
//!
//! A record written under an older schema is moved forward one step at a
//! time by the first [`Upcaster`] that accepts its `(contract, version)`
//! pair, until it reaches the schema version registered in the
//! [`ContractMap`]. Every step must advance the record, so the chain is
//! deterministic and always terminates.

use std::sync::Arc;

use serde_json::Value;

use crate::{ContractMap, EventStoreError, Result, StoredEvent, StoredSnapshot};

/// Upper bound on chained upgrades for a single record.
const MAX_UPCAST_STEPS: usize = 64;

/// The schema-bearing part of a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPayload {
    pub contract: String,
    pub schema_version: u32,
    pub payload: Value,
}

/// One step of a schema upgrade chain.
pub trait Upcaster: Send + Sync {
    /// Returns true if this upcaster accepts records of `contract` at
    /// `schema_version`.
    fn applies(&self, contract: &str, schema_version: u32) -> bool;

    /// Rewrites the record into its next schema.
    fn upcast(&self, record: SchemaPayload) -> Result<SchemaPayload>;
}

/// Upcaster built from a closure over the payload; bumps the schema version
/// by one and keeps the contract name.
pub struct FnUpcaster<F> {
    contract: String,
    from_version: u32,
    f: F,
}

impl<F> FnUpcaster<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    pub fn new(contract: impl Into<String>, from_version: u32, f: F) -> Self {
        Self {
            contract: contract.into(),
            from_version,
            f,
        }
    }
}

impl<F> Upcaster for FnUpcaster<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    fn applies(&self, contract: &str, schema_version: u32) -> bool {
        contract == self.contract && schema_version == self.from_version
    }

    fn upcast(&self, record: SchemaPayload) -> Result<SchemaPayload> {
        Ok(SchemaPayload {
            contract: record.contract,
            schema_version: record.schema_version + 1,
            payload: (self.f)(record.payload)?,
        })
    }
}

/// Ordered collection of upcasters.
#[derive(Clone, Default)]
pub struct UpcasterChain {
    upcasters: Vec<Arc<dyn Upcaster>>,
}

impl UpcasterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, upcaster: impl Upcaster + 'static) -> Self {
        self.upcasters.push(Arc::new(upcaster));
        self
    }

    pub fn push(&mut self, upcaster: Arc<dyn Upcaster>) {
        self.upcasters.push(upcaster);
    }

    pub fn len(&self) -> usize {
        self.upcasters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.upcasters.is_empty()
    }

    /// Upgrades `record` until it matches the schema registered for its
    /// contract.
    pub fn upgrade(
        &self,
        contracts: &dyn ContractMap,
        mut record: SchemaPayload,
    ) -> Result<SchemaPayload> {
        for _ in 0..MAX_UPCAST_STEPS {
            let current = contracts
                .current_schema(&record.contract)
                .ok_or_else(|| EventStoreError::UnknownType(record.contract.clone()))?;

            if record.schema_version == current {
                return Ok(record);
            }
            if record.schema_version > current {
                return Err(EventStoreError::InvalidUpcast {
                    contract: record.contract,
                    reason: format!(
                        "record schema {} is newer than registered schema {current}",
                        record.schema_version
                    ),
                });
            }

            let upcaster = self
                .upcasters
                .iter()
                .find(|u| u.applies(&record.contract, record.schema_version))
                .ok_or_else(|| EventStoreError::MissingUpcaster {
                    contract: record.contract.clone(),
                    schema_version: record.schema_version,
                })?;

            let (contract, from) = (record.contract.clone(), record.schema_version);
            let next = upcaster.upcast(record)?;
            if next.contract == contract && next.schema_version <= from {
                return Err(EventStoreError::InvalidUpcast {
                    contract,
                    reason: format!("upcaster did not advance past schema {from}"),
                });
            }
            record = next;
        }

        Err(EventStoreError::InvalidUpcast {
            contract: record.contract,
            reason: format!("no current schema reached after {MAX_UPCAST_STEPS} steps"),
        })
    }

    /// Upgrades a stored event in place of its contract and payload.
    pub fn upgrade_event(
        &self,
        contracts: &dyn ContractMap,
        mut event: StoredEvent,
    ) -> Result<StoredEvent> {
        let upgraded = self.upgrade(
            contracts,
            SchemaPayload {
                contract: std::mem::take(&mut event.contract),
                schema_version: event.schema_version,
                payload: event.payload.take(),
            },
        )?;
        event.contract = upgraded.contract;
        event.schema_version = upgraded.schema_version;
        event.payload = upgraded.payload;
        Ok(event)
    }

    /// Upgrades a stored snapshot in place of its contract and state.
    pub fn upgrade_snapshot(
        &self,
        contracts: &dyn ContractMap,
        mut snapshot: StoredSnapshot,
    ) -> Result<StoredSnapshot> {
        let upgraded = self.upgrade(
            contracts,
            SchemaPayload {
                contract: std::mem::take(&mut snapshot.contract),
                schema_version: snapshot.schema_version,
                payload: snapshot.state.take(),
            },
        )?;
        snapshot.contract = upgraded.contract;
        snapshot.schema_version = upgraded.schema_version;
        snapshot.state = upgraded.payload;
        Ok(snapshot)
    }
}

impl std::fmt::Debug for UpcasterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcasterChain")
            .field("upcasters", &self.upcasters.len())
            .finish()
    }
}
