//! Mapping between runtime type tokens and storage contract names.
//!
//! Stored records never carry Rust type names. Each aggregate, event variant
//! and snapshot type exposes a short runtime token, and the [`ContractMap`]
//! translates it into a stable contract name plus the schema version new
//! records are written with. Renaming a Rust type only touches the map.

use std::collections::HashMap;

use crate::{EventStoreError, Result};

/// A storage-level contract: stable name and current schema version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    pub name: String,
    pub schema_version: u32,
}

impl Contract {
    pub fn new(name: impl Into<String>, schema_version: u32) -> Self {
        Self {
            name: name.into(),
            schema_version,
        }
    }
}

/// Pluggable type↔contract lookup.
pub trait ContractMap: Send + Sync {
    /// Returns the contract new records of `type_token` are written with.
    fn contract_for(&self, type_token: &str) -> Option<Contract>;

    /// Returns the runtime type token stored records of `contract` decode into.
    fn type_for(&self, contract: &str) -> Option<String>;

    /// Like [`contract_for`](Self::contract_for) but fails with
    /// [`EventStoreError::UnknownContract`].
    fn require_contract(&self, type_token: &str) -> Result<Contract> {
        self.contract_for(type_token)
            .ok_or_else(|| EventStoreError::UnknownContract(type_token.to_string()))
    }

    /// Like [`type_for`](Self::type_for) but fails with
    /// [`EventStoreError::UnknownType`].
    fn require_type(&self, contract: &str) -> Result<String> {
        self.type_for(contract)
            .ok_or_else(|| EventStoreError::UnknownType(contract.to_string()))
    }

    /// Current schema version for a stored contract name, following aliases.
    fn current_schema(&self, contract: &str) -> Option<u32> {
        let token = self.type_for(contract)?;
        self.contract_for(&token).map(|c| c.schema_version)
    }
}

/// In-process [`ContractMap`] populated at startup.
#[derive(Debug, Clone, Default)]
pub struct ContractRegistry {
    by_type: HashMap<String, Contract>,
    by_contract: HashMap<String, String>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `type_token` under `contract` at `schema_version`.
    ///
    /// Registering the same token again replaces its contract; the previous
    /// contract name keeps resolving to the token so old records still load.
    pub fn register(
        &mut self,
        type_token: impl Into<String>,
        contract: impl Into<String>,
        schema_version: u32,
    ) -> &mut Self {
        let type_token = type_token.into();
        let contract = Contract::new(contract, schema_version);
        self.by_contract
            .insert(contract.name.clone(), type_token.clone());
        self.by_type.insert(type_token, contract);
        self
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(
        mut self,
        type_token: impl Into<String>,
        contract: impl Into<String>,
        schema_version: u32,
    ) -> Self {
        self.register(type_token, contract, schema_version);
        self
    }

    /// Makes a retired contract name decode into `type_token`.
    pub fn alias(mut self, old_contract: impl Into<String>, type_token: impl Into<String>) -> Self {
        self.by_contract.insert(old_contract.into(), type_token.into());
        self
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

impl ContractMap for ContractRegistry {
    fn contract_for(&self, type_token: &str) -> Option<Contract> {
        self.by_type.get(type_token).cloned()
    }

    fn type_for(&self, contract: &str) -> Option<String> {
        self.by_contract.get(contract).cloned()
    }
}
