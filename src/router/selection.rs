//! Active Selection Cache
//!
//! Per-tenant cache of the last known-good (key, model) pair. Entries are
//! validated lazily on every read against the registry and the exhaustion
//! tracker; a stale entry is discarded and a fresh candidate is computed
//! from the tenant's last-known rotation position.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::registry::{Candidate, KeyRegistry};
use crate::router::exhaustion::ExhaustionTracker;
use crate::router::policy::PolicyStore;
use crate::router::strategy::next_candidate;
use crate::router::usage::UsageAccountant;

/// Soft and hard constraints a caller attaches to a resolution
#[derive(Debug, Clone, Default)]
pub struct SelectionHint {
    /// Expected token cost. Soft: a candidate whose per-minute token window
    /// would overflow is skipped, unless that leaves no candidate at all.
    pub predicted_tokens: Option<u64>,

    /// Hard: only models that support embedding may serve the request.
    pub needs_embedding: bool,
}

#[derive(Debug, Clone)]
struct CacheSlot {
    /// The validated pair handed out to the tenant
    active: Option<(String, String)>,

    /// Rotation position; survives invalidation so the next resolution
    /// continues from here instead of restarting at the top
    last: Option<(String, String)>,

    cached_at: DateTime<Utc>,
}

impl Default for CacheSlot {
    fn default() -> Self {
        Self {
            active: None,
            last: None,
            cached_at: Utc::now(),
        }
    }
}

pub struct ActiveSelectionCache {
    slots: RwLock<HashMap<String, CacheSlot>>,
    registry: Arc<KeyRegistry>,
    tracker: Arc<ExhaustionTracker>,
    policy: Arc<PolicyStore>,
    usage: Arc<UsageAccountant>,
}

impl ActiveSelectionCache {
    pub fn new(
        registry: Arc<KeyRegistry>,
        tracker: Arc<ExhaustionTracker>,
        policy: Arc<PolicyStore>,
        usage: Arc<UsageAccountant>,
    ) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            registry,
            tracker,
            policy,
            usage,
        }
    }

    fn admits(&self, candidate: &Candidate, hint: &SelectionHint) -> bool {
        match (candidate.tokens_per_minute, hint.predicted_tokens) {
            (Some(ceiling), Some(predicted)) => {
                let used = self
                    .usage
                    .window_tokens(&candidate.key_id, &candidate.model_id);
                used + predicted <= ceiling
            }
            _ => true,
        }
    }

    /// Return the tenant's active pair, recomputing if the cached one has
    /// gone stale. `None` means the pool is fully exhausted or disabled.
    pub fn resolve(&self, tenant_id: &str, hint: &SelectionHint) -> Option<Candidate> {
        let mut candidates = self.registry.list_candidates(tenant_id);
        if hint.needs_embedding {
            candidates.retain(|c| c.supports_embedding);
        }
        if candidates.is_empty() {
            self.invalidate(tenant_id);
            return None;
        }

        let slot = self.slots.read().get(tenant_id).cloned().unwrap_or_default();

        if let Some((key_id, model_id)) = &slot.active {
            if let Some(candidate) = candidates.iter().find(|c| c.is_pair(key_id, model_id)) {
                if self.tracker.is_selectable(key_id, model_id) && self.admits(candidate, hint) {
                    return Some(candidate.clone());
                }
            }
            // Stale: exhausted, disabled, or over the token hint. Fall
            // through and rotate.
        }

        let strategy = self.policy.strategy_for(tenant_id);
        let current = slot
            .last
            .as_ref()
            .map(|(k, m)| (k.as_str(), m.as_str()));

        let selectable =
            |c: &Candidate| self.tracker.is_selectable(&c.key_id, &c.model_id);
        let chosen = next_candidate(&candidates, current, strategy, &|c| {
            selectable(c) && self.admits(c, hint)
        })
        .or_else(|| {
            // The token hint is soft: if honoring it leaves nothing, retry
            // without it rather than failing the tenant.
            if hint.predicted_tokens.is_some() {
                next_candidate(&candidates, current, strategy, &selectable)
            } else {
                None
            }
        })
        .cloned();

        match chosen {
            Some(candidate) => {
                tracing::debug!(
                    tenant_id,
                    key_id = %candidate.key_id,
                    model_id = %candidate.model_id,
                    "selection cached"
                );
                self.store(tenant_id, &candidate.key_id, &candidate.model_id);
                Some(candidate)
            }
            None => {
                self.invalidate(tenant_id);
                None
            }
        }
    }

    fn store(&self, tenant_id: &str, key_id: &str, model_id: &str) {
        let mut slots = self.slots.write();
        let slot = slots.entry(tenant_id.to_string()).or_default();
        slot.active = Some((key_id.to_string(), model_id.to_string()));
        slot.last = slot.active.clone();
        slot.cached_at = Utc::now();
    }

    /// Overwrite the cache unconditionally, so the next request starts from
    /// a candidate known good mid-rotation
    pub fn force(&self, tenant_id: &str, key_id: &str, model_id: &str) {
        self.store(tenant_id, key_id, model_id);
    }

    /// Drop the tenant's cached pair without recomputation; the rotation
    /// position is kept
    pub fn invalidate(&self, tenant_id: &str) {
        if let Some(slot) = self.slots.write().get_mut(tenant_id) {
            slot.active = None;
        }
    }

    /// Drop every slot, rotation positions included. Admin events (scope
    /// toggle, strategy change, reset, reload) restart every tenant from
    /// the top of the pool.
    pub fn invalidate_all(&self) {
        self.slots.write().clear();
    }
}

impl std::fmt::Debug for ActiveSelectionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSelectionCache")
            .field("tenants", &self.slots.read().len())
            .finish()
    }
}
