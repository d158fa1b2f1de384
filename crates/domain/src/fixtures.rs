//! Small aggregate shared by the unit tests of this crate.

use std::sync::atomic::{AtomicUsize, Ordering};

use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateRoot, DomainEvent, PendingEvents};
use crate::handlers::Handlers;

pub static REGISTRATIONS: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CounterEvent {
    Added { amount: i64 },
    Subtracted { amount: i64 },
    /// Deliberately left without a handler.
    Reset,
}

impl DomainEvent for CounterEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Added { .. } => "Added",
            Self::Subtracted { .. } => "Subtracted",
            Self::Reset => "Reset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counter {
    pub key: String,
    pub version: Version,
    pub value: i64,
    #[serde(skip)]
    pub changes: PendingEvents<String, CounterEvent>,
}

impl AggregateRoot for Counter {
    type Key = String;
    type Event = CounterEvent;
    type Snapshot = Self;

    fn aggregate_type() -> &'static str {
        "test.counter"
    }

    fn uninitialized(key: String) -> Self {
        Self {
            key,
            version: Version::initial(),
            value: 0,
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

    fn pending(&self) -> &PendingEvents<String, CounterEvent> {
        &self.changes
    }

    fn pending_mut(&mut self) -> &mut PendingEvents<String, CounterEvent> {
        &mut self.changes
    }

    fn register_handlers(handlers: &mut Handlers<Self>) {
        REGISTRATIONS.fetch_add(1, Ordering::SeqCst);
        handlers
            .on("Added", |counter, event| {
                if let CounterEvent::Added { amount } = event {
                    counter.value += amount;
                }
            })
            .on("Subtracted", |counter, event| {
                if let CounterEvent::Subtracted { amount } = event {
                    counter.value -= amount;
                }
            });
    }
}
