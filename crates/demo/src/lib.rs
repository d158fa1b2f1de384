//! Bank-account walkthrough of the persistence engine.
//!
//! [`Bank`] is a small application service: every operation enters a unit of
//! work, loads accounts through an event-sourced repository, changes them and
//! completes. [`run`] drives it through a scripted scenario and reports what
//! ended up in storage and in the balance read model.

pub mod bank;
pub mod config;
pub mod error;

use std::sync::Arc;

use common::AggregateId;
use domain::{AggregateRoot, RecordCodec};
use event_store::InMemoryEventStore;
use unit_of_work::{
    CacheToken, DomainEventBus, EventSourced, Repository, SnapshotPolicy, UnitOfWork,
    UnitOfWorkFactory,
};

use crate::bank::{Account, BalanceProjection};
use crate::config::DemoConfig;
pub use crate::error::{DemoError, Result};

type Accounts = Repository<Account, EventSourced<InMemoryEventStore>>;

/// Application service over bank accounts.
pub struct Bank {
    factory: UnitOfWorkFactory,
    store: InMemoryEventStore,
    codec: RecordCodec,
    policy: SnapshotPolicy,
    repository: CacheToken,
}

impl Bank {
    pub fn new(factory: UnitOfWorkFactory, store: InMemoryEventStore) -> Self {
        let policy = factory.config().snapshot_policy();
        Self {
            factory,
            store,
            codec: RecordCodec::new(bank::contracts()),
            policy,
            repository: CacheToken::new(),
        }
    }

    pub fn store(&self) -> &InMemoryEventStore {
        &self.store
    }

    /// One repository per unit of work, so joined calls share its identity map.
    fn accounts(&self, scope: &UnitOfWork) -> Arc<Accounts> {
        let repository = scope.cached(&self.repository, || {
            let strategy = EventSourced::new(self.store.clone(), self.codec.clone())
                .with_snapshot_policy(self.policy);
            Repository::in_scope(scope, strategy)
        });
        Arc::clone(&repository)
    }

    /// Opens an account with an initial deposit.
    #[tracing::instrument(skip(self))]
    pub async fn open(&self, owner: &str, initial_cents: i64) -> Result<AggregateId> {
        let scope = self.factory.enter(None);
        let mut account = Account::open(owner)?;
        if initial_cents > 0 {
            account.deposit(initial_cents)?;
        }
        let id = account.id();
        self.accounts(&scope).add(account).await?;
        scope.complete().await?;
        Ok(id)
    }

    /// Moves `cents` between two accounts, joining `parent` when given.
    #[tracing::instrument(skip(self, parent))]
    pub async fn transfer(
        &self,
        parent: Option<&UnitOfWork>,
        from: AggregateId,
        to: AggregateId,
        cents: i64,
    ) -> Result<()> {
        if cents <= 0 {
            return Err(DemoError::InvalidAmount(cents));
        }

        let scope = self.factory.enter(parent);
        let accounts = self.accounts(&scope);
        let source = accounts.get_by_key(&from).await?;
        let target = accounts.get_by_key(&to).await?;

        {
            let mut source = source.write().await;
            if source.balance() < cents {
                return Err(DemoError::InsufficientFunds {
                    account: from,
                    balance: source.balance(),
                    requested: cents,
                });
            }
            source.withdraw(cents)?;
        }
        target.write().await.deposit(cents)?;

        scope.complete().await?;
        Ok(())
    }

    /// Pays `cents` from `from` to each of `to` in one unit of work.
    #[tracing::instrument(skip(self, to))]
    pub async fn payroll(&self, from: AggregateId, to: &[AggregateId], cents: i64) -> Result<()> {
        let scope = self.factory.enter(None);
        for recipient in to {
            self.transfer(Some(scope.unit_of_work()), from, *recipient, cents).await?;
        }
        scope.complete().await?;
        Ok(())
    }

    pub async fn balance(&self, id: AggregateId) -> Result<i64> {
        let scope = self.factory.enter(None);
        let account = self.accounts(&scope).get_by_key(&id).await?;
        let balance = account.read().await.balance();
        scope.complete().await?;
        Ok(balance)
    }

    /// Loads `id` in two units of work and deposits in both. Returns the
    /// error of the one that completes second.
    pub async fn race(&self, id: AggregateId) -> Result<()> {
        let first = self.factory.enter(None);
        let second = self.factory.enter(None);
        let a = self.accounts(&first).get_by_key(&id).await?;
        let b = self.accounts(&second).get_by_key(&id).await?;
        a.write().await.deposit(1)?;
        b.write().await.deposit(1)?;

        first.complete().await?;
        second.complete().await?;
        Ok(())
    }
}

/// What a scenario run left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub accounts: usize,
    pub transfers_completed: usize,
    pub transfers_rejected: usize,
    pub payroll_paid: bool,
    pub conflicts: usize,
    pub events_stored: usize,
    pub stored_total: i64,
    pub projected_total: i64,
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "accounts:            {}", self.accounts)?;
        writeln!(f, "transfers completed: {}", self.transfers_completed)?;
        writeln!(f, "transfers rejected:  {}", self.transfers_rejected)?;
        writeln!(f, "payroll paid:        {}", self.payroll_paid)?;
        writeln!(f, "conflicts:           {}", self.conflicts)?;
        writeln!(f, "events stored:       {}", self.events_stored)?;
        writeln!(f, "stored total:        {}", self.stored_total)?;
        write!(f, "projected total:     {}", self.projected_total)
    }
}

/// Turns an insufficient-funds rejection into `Ok(true)`.
fn rejected(outcome: Result<()>) -> Result<bool> {
    match outcome {
        Ok(()) => Ok(false),
        Err(DemoError::InsufficientFunds {
            account,
            balance,
            requested,
        }) => {
            metrics::counter!("bank_transfers_rejected_total").increment(1);
            tracing::info!(%account, balance, requested, "transfer rejected");
            Ok(true)
        }
        Err(other) => Err(other),
    }
}

/// Opens accounts, runs transfers, a payroll batch and a deliberate race.
pub async fn run(config: &DemoConfig, bus: DomainEventBus) -> Result<Summary> {
    let projection = Arc::new(BalanceProjection::default());
    bus.subscribe(projection.clone()).await;
    let factory = UnitOfWorkFactory::new(bus).with_config(config.unit_of_work.clone());
    let bank = Bank::new(factory, InMemoryEventStore::new());

    let accounts = config.accounts.max(2);
    let mut summary = Summary {
        accounts,
        ..Summary::default()
    };

    let mut ids = Vec::with_capacity(accounts);
    for n in 0..accounts {
        ids.push(bank.open(&format!("owner-{n}"), 10_000).await?);
    }

    for n in 0..config.transfers {
        let from = ids[n % ids.len()];
        let to = ids[(n + 1) % ids.len()];
        let cents = i64::try_from(n + 1).unwrap_or(i64::MAX).saturating_mul(4_000);
        if rejected(bank.transfer(None, from, to, cents).await)? {
            summary.transfers_rejected += 1;
        } else {
            summary.transfers_completed += 1;
        }
    }

    if let Some((payer, payees)) = ids.split_first() {
        summary.payroll_paid = !rejected(bank.payroll(*payer, payees, 100).await)?;
    }

    match bank.race(ids[0]).await {
        Err(error) if error.is_concurrency_conflict() => summary.conflicts += 1,
        other => other?,
    }

    for id in &ids {
        summary.stored_total += bank.balance(*id).await?;
    }
    summary.events_stored = bank.store().event_count().await;
    summary.projected_total = projection.total();

    tracing::info!(
        accounts = summary.accounts,
        events = summary.events_stored,
        "scenario finished"
    );
    Ok(summary)
}
