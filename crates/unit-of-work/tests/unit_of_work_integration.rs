//! Integration tests for scopes, flush groups and event publication.

mod support;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::AggregateId;
use event_store::{InMemoryEventStore, Version};
use support::{Account, AccountEvent, codec, event_sourced};
use unit_of_work::{
    DomainEventBus, EventListener, EventSourced, FlushGroup, ListenerError, PublishedEvent,
    Repository, RepositoryError, RepositoryOptions, TransactionBoundary, UnitOfWork,
    UnitOfWorkConfig, UnitOfWorkError, UnitOfWorkFactory,
};

/// Collects deposits seen by listeners.
#[derive(Default)]
struct DepositLog {
    deposits: Mutex<Vec<(String, i64)>>,
}

#[async_trait]
impl EventListener for DepositLog {
    fn name(&self) -> &'static str {
        "deposit-log"
    }

    async fn handle(&self, event: &PublishedEvent) -> Result<(), ListenerError> {
        if let Some(record) = event.record::<Account>()
            && let AccountEvent::Deposited { cents } = &record.event
        {
            self.deposits
                .lock()
                .unwrap()
                .push((record.key.to_string(), *cents));
        }
        Ok(())
    }
}

impl DepositLog {
    fn seen(&self) -> Vec<(String, i64)> {
        self.deposits.lock().unwrap().clone()
    }
}

async fn bus_with_log() -> (DomainEventBus, Arc<DepositLog>) {
    let bus = DomainEventBus::new();
    let log = Arc::new(DepositLog::default());
    bus.subscribe(log.clone()).await;
    (bus, log)
}

async fn open_account(factory: &UnitOfWorkFactory, store: &InMemoryEventStore) -> AggregateId {
    let scope = factory.enter(None);
    let repo = Repository::<Account, _>::in_scope(&scope, event_sourced(store));
    let handle = repo.add(Account::open("ada")).await.unwrap();
    scope.complete().await.unwrap();
    handle.read().await.id
}

/// Application service that joins the caller's unit of work if there is one.
async fn deposit(
    factory: &UnitOfWorkFactory,
    parent: Option<&UnitOfWork>,
    store: &InMemoryEventStore,
    id: AggregateId,
    cents: i64,
) -> Result<(), UnitOfWorkError> {
    let scope = factory.enter(parent);
    let repo = Repository::<Account, _>::in_scope(&scope, event_sourced(store));
    let account = repo.get_by_key(&id).await?;
    account
        .write()
        .await
        .deposit(cents)
        .map_err(RepositoryError::from)?;
    scope.complete().await
}

#[tokio::test]
async fn events_are_delivered_after_a_successful_flush_only() {
    let (bus, log) = bus_with_log().await;
    let factory = UnitOfWorkFactory::new(bus);
    let store = InMemoryEventStore::new();
    let id = open_account(&factory, &store).await;

    let scope = factory.enter(None);
    let repo = Repository::<Account, _>::in_scope(&scope, event_sourced(&store));
    let account = repo.get_by_key(&id).await.unwrap();
    account.write().await.deposit(700).unwrap();

    repo.flush().await.unwrap();
    assert!(log.seen().is_empty(), "stored but scope not completed");

    scope.complete().await.unwrap();
    assert_eq!(log.seen(), vec![(id.to_string(), 700)]);
}

#[tokio::test]
async fn failed_flush_delivers_nothing() {
    let (bus, log) = bus_with_log().await;
    let factory = UnitOfWorkFactory::new(bus);
    let store = InMemoryEventStore::new();
    let id = open_account(&factory, &store).await;

    let stale = factory.enter(None);
    let stale_repo = Repository::<Account, _>::in_scope(&stale, event_sourced(&store));
    let stale_account = stale_repo.get_by_key(&id).await.unwrap();

    deposit(&factory, None, &store, id, 100).await.unwrap();
    assert_eq!(log.seen().len(), 1);

    stale_account.write().await.deposit(900).unwrap();
    let err = stale.complete().await.unwrap_err();

    assert!(err.repository_error().is_some_and(RepositoryError::is_concurrency_conflict));
    assert_eq!(log.seen(), vec![(id.to_string(), 100)]);
}

#[tokio::test]
async fn nested_calls_share_the_outer_unit_of_work() {
    let (bus, log) = bus_with_log().await;
    let factory = UnitOfWorkFactory::new(bus);
    let store = InMemoryEventStore::new();
    let id = open_account(&factory, &store).await;

    let outer = factory.enter(None);
    let parent = Some(outer.unit_of_work());
    deposit(&factory, parent, &store, id, 100).await.unwrap();
    deposit(&factory, parent, &store, AggregateId::new(), 1)
        .await
        .unwrap_err();

    assert!(log.seen().is_empty());
    assert_eq!(store.event_count().await, 1);

    outer.complete().await.unwrap();

    assert_eq!(log.seen(), vec![(id.to_string(), 100)]);
    assert_eq!(store.event_count().await, 2);
}

#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl TransactionBoundary for Journal {
    async fn begin(&self) -> unit_of_work::Result<()> {
        self.entries.lock().unwrap().push("begin");
        Ok(())
    }

    async fn commit(&self) -> unit_of_work::Result<()> {
        self.entries.lock().unwrap().push("commit");
        Ok(())
    }

    async fn rollback(&self) -> unit_of_work::Result<()> {
        self.entries.lock().unwrap().push("rollback");
        Ok(())
    }
}

#[tokio::test]
async fn grouped_repositories_flush_inside_their_boundary() {
    let factory = UnitOfWorkFactory::new(DomainEventBus::new());
    let store = InMemoryEventStore::new();
    let journal = Arc::new(Journal::default());
    let group = FlushGroup::new("transfers", journal.clone());

    let scope = factory.enter(None);
    let options = RepositoryOptions::default().group(group);
    let uow = Some(scope.unit_of_work());
    let from = Repository::<Account, _>::with_options(uow, event_sourced(&store), options.clone());
    let to = Repository::<Account, _>::with_options(uow, event_sourced(&store), options);
    from.add(Account::open("ada")).await.unwrap();
    to.add(Account::open("bob")).await.unwrap();

    scope.complete().await.unwrap();

    assert_eq!(*journal.entries.lock().unwrap(), vec!["begin", "commit"]);
    assert_eq!(store.event_count().await, 2);
}

#[tokio::test]
async fn group_with_a_clean_member_flushes_without_boundary() {
    let factory = UnitOfWorkFactory::new(DomainEventBus::new());
    let store = InMemoryEventStore::new();
    let id = open_account(&factory, &store).await;
    let journal = Arc::new(Journal::default());
    let group = FlushGroup::new("transfers", journal.clone());
    let options = RepositoryOptions::default().group(group);

    let scope = factory.enter(None);
    let uow = Some(scope.unit_of_work());
    let reader = Repository::<Account, _>::with_options(uow, event_sourced(&store), options.clone());
    let writer = Repository::<Account, _>::with_options(uow, event_sourced(&store), options);
    reader.get_by_key(&id).await.unwrap();
    writer.add(Account::open("bob")).await.unwrap();

    scope.complete().await.unwrap();

    assert!(journal.entries.lock().unwrap().is_empty());
    assert_eq!(store.event_count().await, 2);
}

#[tokio::test]
async fn configured_snapshot_interval_stores_snapshots() {
    let config = UnitOfWorkConfig {
        snapshot_interval: 2,
        ..UnitOfWorkConfig::default()
    };
    let factory = UnitOfWorkFactory::new(DomainEventBus::new()).with_config(config.clone());
    let store = InMemoryEventStore::new();

    let scope = factory.enter(None);
    let strategy =
        EventSourced::new(store.clone(), codec()).with_snapshot_policy(config.snapshot_policy());
    let repo = Repository::<Account, _>::in_scope(&scope, strategy);
    let mut account = Account::open("ada");
    account.deposit(50).unwrap();
    let id = account.id;
    repo.add(account).await.unwrap();
    scope.complete().await.unwrap();

    let stream = codec().stream_id::<Account>(&id).unwrap();
    assert!(store.has_snapshot(&stream).await);

    let scope = factory.enter(None);
    let repo = Repository::<Account, _>::in_scope(&scope, event_sourced(&store));
    let loaded = repo.get_by_key(&id).await.unwrap();
    assert_eq!(loaded.read().await.version, Version::new(2));
    assert_eq!(loaded.read().await.balance, 50);
}
