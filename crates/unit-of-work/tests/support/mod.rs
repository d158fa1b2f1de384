//! Bank account aggregate shared by the integration tests.

#![allow(dead_code)]

use common::AggregateId;
use domain::{AggregateRoot, DomainError, DomainEvent, Handlers, PendingEvents, RecordCodec};
use event_store::{ContractRegistry, InMemoryEventStore, InMemorySnapshotStore, Version};
use serde::{Deserialize, Serialize};
use unit_of_work::{EventSourced, Snapshotting};

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

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AggregateId,
    pub version: Version,
    pub owner: String,
    pub balance: i64,
    #[serde(skip)]
    pub changes: PendingEvents<AggregateId, AccountEvent>,
}

impl AggregateRoot for Account {
    type Key = AggregateId;
    type Event = AccountEvent;
    type Snapshot = Self;

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

impl Account {
    pub fn open(owner: &str) -> Self {
        let mut account = Self::uninitialized(AggregateId::new());
        account
            .raise(AccountEvent::Opened {
                owner: owner.to_string(),
            })
            .unwrap();
        account
    }

    pub fn deposit(&mut self, cents: i64) -> domain::Result<Version> {
        self.raise(AccountEvent::Deposited { cents })
    }

    pub fn withdraw(&mut self, cents: i64) -> domain::Result<Version> {
        if cents > self.balance {
            return Err(DomainError::InvalidArgument(format!(
                "cannot withdraw {cents} from a balance of {}",
                self.balance
            )));
        }
        self.raise(AccountEvent::Withdrawn { cents })
    }
}

pub fn contracts() -> ContractRegistry {
    ContractRegistry::new()
        .with("Account", "bank.account", 1)
        .with("Opened", "bank.account.opened", 1)
        .with("Deposited", "bank.account.deposited", 2)
        .with("Withdrawn", "bank.account.withdrawn", 1)
}

pub fn codec() -> RecordCodec {
    RecordCodec::new(contracts())
}

/// Event-sourced strategy over `store`; clones of a store share its data.
pub fn event_sourced(store: &InMemoryEventStore) -> EventSourced<InMemoryEventStore> {
    EventSourced::new(store.clone(), codec())
}

pub fn snapshotting(store: &InMemorySnapshotStore) -> Snapshotting<InMemorySnapshotStore> {
    Snapshotting::new(store.clone(), codec())
}
