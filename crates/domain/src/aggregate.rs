//! Core aggregate and domain event traits.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use common::AggregateKey;
use event_store::{EventId, Version};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{DomainError, Result};
use crate::handlers::Handlers;
use crate::memento::Memento;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
///
/// The default payload split expects the event enum to be adjacently tagged
/// (`#[serde(tag = "type", content = "data")]`) with the tag equal to
/// [`event_type`](Self::event_type). Events with another serde layout
/// override [`to_payload`](Self::to_payload) and
/// [`from_payload`](Self::from_payload).
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Returns the runtime type token of this event.
    ///
    /// Used for handler lookup and mapped to a storage contract.
    fn event_type(&self) -> &'static str;

    /// Returns the event body without its type tag.
    fn to_payload(&self) -> Result<Value> {
        let mut value = serde_json::to_value(self)?;
        Ok(value
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Rebuilds an event from its type token and body.
    fn from_payload(event_type: &str, payload: Value) -> Result<Self> {
        let tagged = if payload.is_null() {
            serde_json::json!({ "type": event_type })
        } else {
            serde_json::json!({ "type": event_type, "data": payload })
        };
        Ok(serde_json::from_value(tagged)?)
    }
}

/// One applied change: which aggregate, at which version, and what happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord<K, E> {
    pub event_id: EventId,
    pub key: K,
    pub version: Version,
    pub timestamp: DateTime<Utc>,
    pub event: E,
}

impl<K, E> EventRecord<K, E> {
    pub fn new(key: K, version: Version, event: E) -> Self {
        Self {
            event_id: EventId::new(),
            key,
            version,
            timestamp: Utc::now(),
            event,
        }
    }
}

/// FIFO buffer of events an aggregate has published but nobody has
/// committed yet.
#[derive(Debug, Clone)]
pub struct PendingEvents<K, E> {
    events: Vec<EventRecord<K, E>>,
}

impl<K, E> Default for PendingEvents<K, E> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<K, E> PendingEvents<K, E> {
    pub fn push(&mut self, record: EventRecord<K, E>) {
        self.events.push(record);
    }

    pub fn as_slice(&self) -> &[EventRecord<K, E>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Swaps the buffer for an empty one and returns what it held.
    pub fn take(&mut self) -> Vec<EventRecord<K, E>> {
        std::mem::take(&mut self.events)
    }
}

/// Shorthand for an aggregate's event record type.
pub type RecordOf<A> = EventRecord<<A as AggregateRoot>::Key, <A as AggregateRoot>::Event>;

/// Trait for aggregate roots.
///
/// An aggregate root is the consistency boundary for a cluster of domain
/// objects. Its state only changes by applying events: [`raise`](Self::raise)
/// stamps a new event with the next version, applies it and buffers it until
/// a repository commits the aggregate.
///
/// Implementors provide identity, version bookkeeping, the pending-event
/// buffer and a handler registration; everything else has a default.
pub trait AggregateRoot: Sized + Send + Sync + 'static {
    /// Primary key type.
    type Key: AggregateKey;

    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Memento used for snapshots. Aggregates that serialize themselves use
    /// `Self`.
    type Snapshot: Memento<Self>;

    /// Returns the aggregate type token.
    ///
    /// Mapped to the storage contract that names the aggregate's streams.
    fn aggregate_type() -> &'static str;

    /// Creates an empty aggregate for `key` that no event has touched yet.
    fn uninitialized(key: Self::Key) -> Self;

    /// Returns the aggregate's key. Never changes after construction.
    fn key(&self) -> &Self::Key;

    /// Returns the current version of the aggregate.
    fn version(&self) -> Version;

    /// Sets the aggregate version. Called by the apply path only.
    fn set_version(&mut self, version: Version);

    /// Returns the pending-event buffer.
    fn pending(&self) -> &PendingEvents<Self::Key, Self::Event>;

    /// Returns the pending-event buffer for modification.
    fn pending_mut(&mut self) -> &mut PendingEvents<Self::Key, Self::Event>;

    /// Registers one handler per event type.
    ///
    /// Called once per aggregate type, the first time an event is applied.
    fn register_handlers(handlers: &mut Handlers<Self>);

    /// Captures the full state as a memento.
    ///
    /// Defaults to [`Memento::capture`], which clones aggregates that are
    /// their own memento.
    fn create_snapshot(&self) -> Self::Snapshot {
        <Self::Snapshot as Memento<Self>>::capture(self)
    }

    /// Version the next raised event will carry.
    ///
    /// Fails with [`DomainError::Versioning`] when the current version is
    /// already `i64::MAX`.
    fn next_version(&self) -> Result<Version> {
        self.version()
            .next()
            .ok_or_else(|| DomainError::Versioning {
                aggregate_type: Self::aggregate_type(),
                key: self.key().to_string(),
                reason: format!("version {} cannot be advanced", self.version()),
            })
    }

    /// Returns true if the aggregate moved past `original` since it was
    /// loaded.
    fn has_been_updated(&self, original: Version) -> bool {
        self.version() > original
    }

    /// Stamps `event` with this aggregate's key and next version, then
    /// publishes it.
    fn raise(&mut self, event: Self::Event) -> Result<Version> {
        let record = EventRecord::new(self.key().clone(), self.next_version()?, event);
        let version = record.version;
        self.publish(record)?;
        Ok(version)
    }

    /// Validates and applies `record`, then appends it to the pending buffer.
    fn publish(&mut self, record: RecordOf<Self>) -> Result<()> {
        self.apply(&record)?;
        self.pending_mut().push(record);
        Ok(())
    }

    /// Applies `record` to the state without buffering it.
    ///
    /// This is the replay path used when restoring from history.
    fn apply(&mut self, record: &RecordOf<Self>) -> Result<()> {
        if &record.key != self.key() {
            return Err(DomainError::Versioning {
                aggregate_type: Self::aggregate_type(),
                key: self.key().to_string(),
                reason: format!("event belongs to key {}", record.key),
            });
        }
        if record.version <= self.version() {
            return Err(DomainError::Versioning {
                aggregate_type: Self::aggregate_type(),
                key: self.key().to_string(),
                reason: format!(
                    "event version {} does not follow current version {}",
                    record.version,
                    self.version()
                ),
            });
        }

        let event_type = record.event.event_type();
        let handler = Handlers::<Self>::shared().get(event_type).ok_or_else(|| {
            DomainError::UnhandledEvent {
                aggregate_type: Self::aggregate_type(),
                event_type: event_type.to_string(),
            }
        })?;

        handler(self, &record.event);
        self.set_version(record.version);
        Ok(())
    }

    /// Returns the events published since the last commit.
    fn uncommitted(&self) -> &[RecordOf<Self>] {
        self.pending().as_slice()
    }

    /// Empties the pending buffer, returning its events for publication.
    fn commit(&mut self) -> Vec<RecordOf<Self>> {
        self.pending_mut().take()
    }
}
