use criterion::{Criterion, criterion_group, criterion_main};
use domain::{AggregateRoot, DomainEvent, EventStreamHistory, Handlers, PendingEvents, RecordCodec};
use event_store::{ContractRegistry, History, StoredEvent, Version};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
enum TallyEvent {
    Incremented { by: u64 },
}

impl DomainEvent for TallyEvent {
    fn event_type(&self) -> &'static str {
        "Incremented"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tally {
    key: String,
    version: Version,
    total: u64,
    #[serde(skip)]
    changes: PendingEvents<String, TallyEvent>,
}

impl AggregateRoot for Tally {
    type Key = String;
    type Event = TallyEvent;
    type Snapshot = Self;

    fn aggregate_type() -> &'static str {
        "Tally"
    }

    fn uninitialized(key: String) -> Self {
        Self {
            key,
            version: Version::initial(),
            total: 0,
            changes: PendingEvents::default(),
        }
    }

    fn key(&self) -> &String {
        &self.key
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn pending(&self) -> &PendingEvents<String, TallyEvent> {
        &self.changes
    }

    fn pending_mut(&mut self) -> &mut PendingEvents<String, TallyEvent> {
        &mut self.changes
    }

    fn register_handlers(handlers: &mut Handlers<Self>) {
        handlers.on("Incremented", |tally, TallyEvent::Incremented { by }| {
            tally.total += by;
        });
    }
}

fn codec() -> RecordCodec {
    RecordCodec::new(
        ContractRegistry::new()
            .with("Tally", "bench.tally", 1)
            .with("Incremented", "bench.tally.incremented", 1),
    )
}

fn recorded(n: u64) -> (Tally, Vec<StoredEvent>) {
    let codec = codec();
    let mut tally = Tally::uninitialized("bench".to_string());
    for i in 0..n {
        tally.raise(TallyEvent::Incremented { by: i }).unwrap();
    }
    let stream = codec.stream_id::<Tally>(tally.key()).unwrap();
    let events = tally
        .commit()
        .iter()
        .map(|r| codec.encode_event::<Tally>(&stream, r).unwrap())
        .collect();
    (tally, events)
}

fn bench_raise_100(c: &mut Criterion) {
    c.bench_function("domain/raise_100", |b| {
        b.iter(|| {
            let mut tally = Tally::uninitialized("bench".to_string());
            for i in 0..100 {
                tally.raise(TallyEvent::Incremented { by: i }).unwrap();
            }
            tally.commit()
        });
    });
}

fn bench_restore_100_events(c: &mut Criterion) {
    let codec = codec();
    let (_, events) = recorded(100);

    c.bench_function("domain/restore_100_events", |b| {
        b.iter(|| {
            let history = History::new(None, events.clone());
            EventStreamHistory::new("bench".to_string(), history)
                .restore::<Tally>(&codec)
                .unwrap()
        });
    });
}

fn bench_restore_from_snapshot(c: &mut Criterion) {
    let codec = codec();
    let (tally, events) = recorded(100);
    let stream = codec.stream_id::<Tally>(tally.key()).unwrap();
    let snapshot = codec.encode_snapshot(&stream, &tally).unwrap();

    c.bench_function("domain/restore_from_snapshot", |b| {
        b.iter(|| {
            let history = History::new(Some(snapshot.clone()), events.clone());
            EventStreamHistory::new("bench".to_string(), history)
                .restore::<Tally>(&codec)
                .unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_raise_100,
    bench_restore_100_events,
    bench_restore_from_snapshot,
);
criterion_main!(benches);
