//! Bank account aggregate and the balance read model fed by its events.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use common::AggregateId;
use domain::{AggregateRoot, DomainEvent, Handlers, Memento, PendingEvents};
use event_store::{ContractRegistry, Version};
use serde::{Deserialize, Serialize};
use unit_of_work::{EventListener, ListenerError, PublishedEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AccountEvent {
    Opened { owner: String },
    Deposited { cents: i64 },
    Withdrawn { cents: i64 },
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Opened { .. } => "Opened",
            Self::Deposited { .. } => "Deposited",
            Self::Withdrawn { .. } => "Withdrawn",
        }
    }
}

#[derive(Debug)]
pub struct Account {
    id: AggregateId,
    version: Version,
    owner: String,
    balance: i64,
    changes: PendingEvents<AggregateId, AccountEvent>,
}

impl Account {
    pub fn open(owner: &str) -> domain::Result<Self> {
        let mut account = Self::uninitialized(AggregateId::new());
        account.raise(AccountEvent::Opened {
            owner: owner.to_string(),
        })?;
        Ok(account)
    }

    pub fn id(&self) -> AggregateId {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn deposit(&mut self, cents: i64) -> domain::Result<Version> {
        self.raise(AccountEvent::Deposited { cents })
    }

    /// Callers check the balance first.
    pub fn withdraw(&mut self, cents: i64) -> domain::Result<Version> {
        self.raise(AccountEvent::Withdrawn { cents })
    }
}

/// Snapshot of an [`Account`]; the pending buffer is not part of it.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccountMemento {
    id: AggregateId,
    version: Version,
    owner: String,
    balance: i64,
}

impl Memento<Account> for AccountMemento {
    fn memento_type() -> &'static str {
        "AccountMemento"
    }

    fn capture(account: &Account) -> Self {
        Self {
            id: account.id,
            version: account.version,
            owner: account.owner.clone(),
            balance: account.balance,
        }
    }

    fn memento_version(&self) -> Version {
        self.version
    }

    fn into_aggregate(self) -> domain::Result<Account> {
        Ok(Account {
            id: self.id,
            version: self.version,
            owner: self.owner,
            balance: self.balance,
            changes: PendingEvents::default(),
        })
    }
}

impl AggregateRoot for Account {
    type Key = AggregateId;
    type Event = AccountEvent;
    type Snapshot = AccountMemento;

    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn uninitialized(key: AggregateId) -> Self {
        Self {
            id: key,
            version: Version::initial(),
            owner: String::new(),
            balance: 0,
            changes: PendingEvents::default(),
        }
    }

    fn key(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending(&self) -> &PendingEvents<AggregateId, AccountEvent> {
        &self.changes
    }

    fn pending_mut(&mut self) -> &mut PendingEvents<AggregateId, AccountEvent> {
        &mut self.changes
    }

    fn register_handlers(handlers: &mut Handlers<Self>) {
        handlers
            .on("Opened", |account, event| {
                if let AccountEvent::Opened { owner } = event {
                    account.owner = owner.clone();
                }
            })
            .on("Deposited", |account, event| {
                if let AccountEvent::Deposited { cents } = event {
                    account.balance += cents;
                }
            })
            .on("Withdrawn", |account, event| {
                if let AccountEvent::Withdrawn { cents } = event {
                    account.balance -= cents;
                }
            });
    }
}

/// Storage contracts of the bank aggregate, its memento and its events.
pub fn contracts() -> ContractRegistry {
    ContractRegistry::new()
        .with("Account", "bank.account", 1)
        .with("AccountMemento", "bank.account.memento", 1)
        .with("Opened", "bank.account.opened", 1)
        .with("Deposited", "bank.account.deposited", 1)
        .with("Withdrawn", "bank.account.withdrawn", 1)
}

/// Read model of account balances, updated from published events.
#[derive(Debug, Default)]
pub struct BalanceProjection {
    balances: Mutex<HashMap<AggregateId, i64>>,
}

impl BalanceProjection {
    pub fn balance(&self, id: &AggregateId) -> Option<i64> {
        self.lock().get(id).copied()
    }

    pub fn total(&self) -> i64 {
        self.lock().values().sum()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AggregateId, i64>> {
        self.balances
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl EventListener for BalanceProjection {
    fn name(&self) -> &'static str {
        "balances"
    }

    async fn handle(&self, event: &PublishedEvent) -> Result<(), ListenerError> {
        let Some(record) = event.record::<Account>() else {
            return Ok(());
        };
        let mut balances = self.lock();
        let balance = balances.entry(record.key).or_default();
        match &record.event {
            AccountEvent::Opened { .. } => {}
            AccountEvent::Deposited { cents } => *balance += cents,
            AccountEvent::Withdrawn { cents } => *balance -= cents,
        }
        Ok(())
    }
}
