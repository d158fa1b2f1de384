//! Per-type registry of event handlers.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::aggregate::AggregateRoot;

/// A state transition for one event type.
pub type Handler<A> = fn(&mut A, &<A as AggregateRoot>::Event);

type Registry = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Maps event type tokens to the handler that applies them to `A`.
///
/// Each aggregate type builds its table once, through
/// [`AggregateRoot::register_handlers`], and every instance shares it.
pub struct Handlers<A: AggregateRoot> {
    handlers: HashMap<&'static str, Handler<A>>,
}

impl<A: AggregateRoot> Handlers<A> {
    fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers `handler` for events whose type token is `event_type`.
    ///
    /// A second registration for the same token replaces the first.
    pub fn on(&mut self, event_type: &'static str, handler: Handler<A>) -> &mut Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn get(&self, event_type: &str) -> Option<Handler<A>> {
        self.handlers.get(event_type).copied()
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns the shared table for `A`, building it on first use.
    pub fn shared() -> Arc<Self> {
        let registry = REGISTRY.get_or_init(Default::default);
        let type_id = TypeId::of::<A>();

        if let Some(existing) = registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&type_id)
            .cloned()
            && let Ok(handlers) = existing.downcast::<Self>()
        {
            return handlers;
        }

        let mut built = Self::new();
        A::register_handlers(&mut built);
        let built = Arc::new(built);

        // Another thread may have raced us here; keep whichever landed first.
        let stored = registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(type_id)
            .or_insert_with(|| built.clone() as Arc<dyn Any + Send + Sync>)
            .clone();
        stored.downcast::<Self>().unwrap_or(built)
    }
}

impl<A: AggregateRoot> std::fmt::Debug for Handlers<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("Handlers")
            .field("aggregate_type", &A::aggregate_type())
            .field("event_types", &types)
            .finish()
    }
}
