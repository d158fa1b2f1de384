use criterion::{Criterion, criterion_group, criterion_main};
use domain::{AggregateRoot, DomainEvent, Handlers, PendingEvents, RecordCodec};
use event_store::{ContractRegistry, InMemoryEventStore, Version};
use serde::{Deserialize, Serialize};
use unit_of_work::{DomainEventBus, EventSourced, Repository, UnitOfWorkFactory};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum MeterEvent {
    Read { value: u64 },
}

impl DomainEvent for MeterEvent {
    fn event_type(&self) -> &'static str {
        "Read"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Meter {
    key: u32,
    version: Version,
    last: u64,
    #[serde(skip)]
    changes: PendingEvents<u32, MeterEvent>,
}

impl AggregateRoot for Meter {
    type Key = u32;
    type Event = MeterEvent;
    type Snapshot = Self;

    fn aggregate_type() -> &'static str {
        "Meter"
    }

    fn uninitialized(key: u32) -> Self {
        Self {
            key,
            version: Version::initial(),
            last: 0,
            changes: PendingEvents::default(),
        }
    }

    fn key(&self) -> &u32 {
        &self.key
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending(&self) -> &PendingEvents<u32, MeterEvent> {
        &self.changes
    }

    fn pending_mut(&mut self) -> &mut PendingEvents<u32, MeterEvent> {
        &mut self.changes
    }

    fn register_handlers(handlers: &mut Handlers<Self>) {
        handlers.on("Read", |meter, MeterEvent::Read { value }| {
            meter.last = *value;
        });
    }
}

fn strategy(store: &InMemoryEventStore) -> EventSourced<InMemoryEventStore> {
    EventSourced::new(
        store.clone(),
        RecordCodec::new(
            ContractRegistry::new()
                .with("Meter", "bench.meter", 1)
                .with("Read", "bench.meter.read", 1),
        ),
    )
}

fn reading(key: u32, value: u64) -> Meter {
    let mut meter = Meter::uninitialized(key);
    meter.raise(MeterEvent::Read { value }).unwrap();
    meter
}

fn bench_complete_100_inserts(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let factory = UnitOfWorkFactory::new(DomainEventBus::new());

    c.bench_function("unit_of_work/complete_100_inserts", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let scope = factory.enter(None);
                let repo = Repository::in_scope(&scope, strategy(&store));
                for key in 0..100 {
                    repo.add(reading(key, 1)).await.unwrap();
                }
                scope.complete().await.unwrap();
            });
        });
    });
}

fn bench_load_update_complete(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let factory = UnitOfWorkFactory::new(DomainEventBus::new());
    let store = InMemoryEventStore::new();
    rt.block_on(async {
        let scope = factory.enter(None);
        let repo = Repository::in_scope(&scope, strategy(&store));
        repo.add(reading(7, 0)).await.unwrap();
        scope.complete().await.unwrap();
    });

    let mut value = 0;
    c.bench_function("unit_of_work/load_update_complete", |b| {
        b.iter(|| {
            value += 1;
            rt.block_on(async {
                let scope = factory.enter(None);
                let repo = Repository::in_scope(&scope, strategy(&store));
                let meter = repo.get_by_key(&7).await.unwrap();
                meter
                    .write()
                    .await
                    .raise(MeterEvent::Read { value })
                    .unwrap();
                scope.complete().await.unwrap();
            });
        });
    });
}

fn bench_identity_map_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let repo = Repository::new(strategy(&store));
    rt.block_on(async {
        repo.add(reading(1, 1)).await.unwrap();
        repo.flush().await.unwrap();
    });

    c.bench_function("unit_of_work/identity_map_hit", |b| {
        b.iter(|| rt.block_on(repo.get_by_key(&1)).unwrap());
    });
}

criterion_group!(
    benches,
    bench_complete_100_inserts,
    bench_load_update_complete,
    bench_identity_map_hit,
);
criterion_main!(benches);
