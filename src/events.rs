//! Invalidation Event Bus
//!
//! Admin actions publish events here instead of calling cache-invalidation
//! methods by name; the selection cache subscribes at wiring time.

use parking_lot::RwLock;

use crate::registry::KeyScope;

/// Events that invalidate cached selection state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// All keys of a scope were enabled or disabled
    KeyScopeToggled { scope: KeyScope, enabled: bool },

    /// The rotation strategy changed (globally or for a tenant)
    StrategyChanged,

    /// An admin picked a preferred starting key
    KeyActivated { key_id: String },

    /// Exhaustion records were cleared by an admin reset
    ExhaustionReset,

    /// The credential snapshot was reloaded
    SnapshotReloaded,
}

type Subscriber = Box<dyn Fn(&RouterEvent) + Send + Sync>;

/// Synchronous in-process publish/subscribe bus
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Subscribers run synchronously on publish and
    /// must not block.
    pub fn subscribe(&self, f: impl Fn(&RouterEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(f));
    }

    /// Deliver an event to all subscribers
    pub fn publish(&self, event: RouterEvent) {
        tracing::debug!(?event, "router event");
        for subscriber in self.subscribers.read().iter() {
            subscriber(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}
