//! Rotation Policy
//!
//! In-memory cache of the configured rotation strategy, global plus
//! per-tenant overrides. Updated only by admin action; reads are lock-cheap
//! and happen on every resolution.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::events::{EventBus, RouterEvent};
use crate::router::strategy::RotationStrategy;

pub struct PolicyStore {
    global: RwLock<RotationStrategy>,
    per_tenant: RwLock<HashMap<String, RotationStrategy>>,
    events: Arc<EventBus>,
}

impl PolicyStore {
    pub fn new(
        global: RotationStrategy,
        per_tenant: HashMap<String, RotationStrategy>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            global: RwLock::new(global),
            per_tenant: RwLock::new(per_tenant),
            events,
        }
    }

    /// Effective strategy for a tenant
    pub fn strategy_for(&self, tenant_id: &str) -> RotationStrategy {
        if let Some(strategy) = self.per_tenant.read().get(tenant_id) {
            return *strategy;
        }
        *self.global.read()
    }

    /// Change the global strategy. Future traversals use the new order;
    /// existing exhaustion records are untouched.
    pub fn set_global(&self, strategy: RotationStrategy) {
        *self.global.write() = strategy;
        tracing::info!(?strategy, "global rotation strategy changed");
        self.events.publish(RouterEvent::StrategyChanged);
    }

    /// Set or clear a tenant override
    pub fn set_tenant(&self, tenant_id: &str, strategy: Option<RotationStrategy>) {
        match strategy {
            Some(s) => {
                self.per_tenant.write().insert(tenant_id.to_string(), s);
            }
            None => {
                self.per_tenant.write().remove(tenant_id);
            }
        }
        tracing::info!(tenant_id, ?strategy, "tenant rotation strategy changed");
        self.events.publish(RouterEvent::StrategyChanged);
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyStore")
            .field("global", &*self.global.read())
            .field("overrides", &self.per_tenant.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_override_beats_global() {
        let store = PolicyStore::new(
            RotationStrategy::KeyFirst,
            HashMap::new(),
            Arc::new(EventBus::new()),
        );

        assert_eq!(store.strategy_for("acme"), RotationStrategy::KeyFirst);

        store.set_tenant("acme", Some(RotationStrategy::ModelFirst));
        assert_eq!(store.strategy_for("acme"), RotationStrategy::ModelFirst);
        assert_eq!(store.strategy_for("other"), RotationStrategy::KeyFirst);

        store.set_tenant("acme", None);
        assert_eq!(store.strategy_for("acme"), RotationStrategy::KeyFirst);
    }

    #[test]
    fn test_set_global_publishes_event() {
        let events = Arc::new(EventBus::new());
        let fired = Arc::new(RwLock::new(0u32));
        let fired_clone = fired.clone();
        events.subscribe(move |e| {
            if matches!(e, RouterEvent::StrategyChanged) {
                *fired_clone.write() += 1;
            }
        });

        let store = PolicyStore::new(RotationStrategy::KeyFirst, HashMap::new(), events);
        store.set_global(RotationStrategy::ModelFirst);

        assert_eq!(*fired.read(), 1);
        assert_eq!(store.strategy_for("any"), RotationStrategy::ModelFirst);
    }
}
