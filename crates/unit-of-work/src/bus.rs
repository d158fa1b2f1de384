//! Deferred publication of domain events to in-process listeners.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{AggregateRoot, DomainEvent, RecordOf};
use event_store::Version;
use tokio::sync::RwLock;

use crate::context::UnitOfWork;

/// Error type listeners report failures with.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// An event on its way to listeners.
///
/// Events raised by aggregates carry the committed [`RecordOf`] as payload
/// along with the aggregate coordinates; other events carry any value.
#[derive(Clone)]
pub struct PublishedEvent {
    pub event_type: &'static str,
    pub aggregate_type: Option<&'static str>,
    pub key: Option<String>,
    pub version: Option<Version>,
    payload: Arc<dyn Any + Send + Sync>,
}

impl PublishedEvent {
    pub fn new<T: Any + Send + Sync>(event_type: &'static str, payload: T) -> Self {
        Self {
            event_type,
            aggregate_type: None,
            key: None,
            version: None,
            payload: Arc::new(payload),
        }
    }

    /// Wraps an event committed by aggregate type `A`.
    pub fn from_record<A: AggregateRoot>(record: RecordOf<A>) -> Self {
        Self {
            event_type: record.event.event_type(),
            aggregate_type: Some(A::aggregate_type()),
            key: Some(record.key.to_string()),
            version: Some(record.version),
            payload: Arc::new(record),
        }
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// The committed record, if this event was raised by aggregate type `A`.
    pub fn record<A: AggregateRoot>(&self) -> Option<&RecordOf<A>> {
        self.payload()
    }
}

impl std::fmt::Debug for PublishedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishedEvent")
            .field("event_type", &self.event_type)
            .field("aggregate_type", &self.aggregate_type)
            .field("key", &self.key)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Receives events after the unit of work that produced them flushed.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Returns the name of this listener.
    fn name(&self) -> &'static str;

    /// Handles a single event.
    async fn handle(&self, event: &PublishedEvent) -> Result<(), ListenerError>;
}

/// Fan-out of published events to subscribed listeners.
///
/// Publishing never reaches listeners directly: the event is queued on the
/// active unit of work and released only after that scope's flush succeeded.
/// A listener failure is logged and does not stop delivery to the others.
#[derive(Clone, Default)]
pub struct DomainEventBus {
    listeners: Arc<RwLock<Vec<Arc<dyn EventListener>>>>,
}

impl DomainEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        tracing::debug!(listener = listener.name(), "listener subscribed");
        self.listeners.write().await.push(listener);
    }

    pub async fn listener_count(&self) -> usize {
        self.listeners.read().await.len()
    }

    /// Queues `event` on `scope`. Returns false, and drops the event, when
    /// there is no active scope.
    pub fn publish(&self, scope: Option<&UnitOfWork>, event: PublishedEvent) -> bool {
        match scope {
            Some(scope) => scope.defer_event(self.clone(), event),
            None => {
                tracing::debug!(event_type = event.event_type, "no active scope, event dropped");
                false
            }
        }
    }

    /// Hands `event` to every listener. Returns the number that accepted it.
    #[tracing::instrument(skip(self, event), fields(event_type = event.event_type))]
    pub(crate) async fn deliver(&self, event: &PublishedEvent) -> usize {
        let listeners = self.listeners.read().await.clone();
        let mut delivered = 0;
        for listener in listeners {
            match listener.handle(event).await {
                Ok(()) => {
                    delivered += 1;
                    metrics::counter!("domain_events_published_total").increment(1);
                }
                Err(error) => {
                    metrics::counter!("domain_events_dropped_total").increment(1);
                    tracing::warn!(
                        listener = listener.name(),
                        error = %error,
                        "listener failed to handle event"
                    );
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for DomainEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainEventBus").finish_non_exhaustive()
    }
}
