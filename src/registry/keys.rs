//! Key Registry
//!
//! Holds the loaded credential snapshot and answers which (key, model) pairs
//! a tenant may use, in rotation order. Keys are ordered by priority then
//! creation time; models within a key by model priority. An admin-activated
//! key is promoted to the front of the order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::events::{EventBus, RouterEvent};

/// Whether a key belongs to the shared pool or to a single tenant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    Shared,
    Tenant,
}

/// A provider credential
#[derive(Debug)]
pub struct ProviderKey {
    /// Stable identifier (never the secret itself)
    pub id: String,

    /// Shared pool or tenant-owned
    pub scope: KeyScope,

    /// Owning tenant; `None` for shared keys
    pub tenant_id: Option<String>,

    /// The actual credential sent to the provider
    pub secret_material: String,

    /// Enabled flag, flipped atomically by scope toggles
    enabled: AtomicBool,

    /// Lower = preferred
    pub priority: i32,

    pub created_at: DateTime<Utc>,
}

impl ProviderKey {
    pub fn new(
        id: impl Into<String>,
        scope: KeyScope,
        tenant_id: Option<String>,
        secret_material: impl Into<String>,
        priority: i32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            tenant_id,
            secret_material: secret_material.into(),
            enabled: AtomicBool::new(true),
            priority,
            created_at,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// What a model can do, used for hard (embedding) and soft (token window)
/// candidate filtering
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    #[serde(default)]
    pub supports_embedding: bool,

    /// Maximum context/output tokens, informational
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-minute token ceiling, consulted by the admission hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_minute: Option<u64>,
}

/// A model registered under a provider key
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: String,
    pub owner_key_id: String,

    /// Name sent on the wire (e.g. "gpt-4o", "gemini-1.5-pro")
    pub name: String,

    /// Lower = preferred
    pub priority: i32,

    pub capabilities: ModelCapabilities,
}

/// A (key, model) pair eligible to serve a request, with the ordering data
/// the strategy engine needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key_id: String,
    pub model_id: String,
    pub key_priority: i32,
    pub model_priority: i32,
    pub supports_embedding: bool,
    pub tokens_per_minute: Option<u64>,
}

impl Candidate {
    /// True when this candidate refers to the given pair
    pub fn is_pair(&self, key_id: &str, model_id: &str) -> bool {
        self.key_id == key_id && self.model_id == model_id
    }
}

/// A key together with its registered models
#[derive(Debug)]
pub struct KeyEntry {
    pub key: ProviderKey,
    pub models: Vec<Arc<ModelDescriptor>>,
}

/// Registry of provider keys and models
pub struct KeyRegistry {
    /// Snapshot, sorted by (key priority, created_at, id); models sorted by
    /// model priority within each entry
    entries: RwLock<Vec<Arc<KeyEntry>>>,

    /// Admin-preferred starting key, promoted to the front of candidate order
    activated: RwLock<Option<String>>,

    events: Arc<EventBus>,
}

impl KeyRegistry {
    pub fn new(entries: Vec<KeyEntry>, events: Arc<EventBus>) -> Self {
        let registry = Self {
            entries: RwLock::new(Vec::new()),
            activated: RwLock::new(None),
            events,
        };
        registry.install_snapshot(entries);
        registry
    }

    fn install_snapshot(&self, mut entries: Vec<KeyEntry>) {
        entries.sort_by(|a, b| {
            (a.key.priority, a.key.created_at, &a.key.id).cmp(&(
                b.key.priority,
                b.key.created_at,
                &b.key.id,
            ))
        });
        for entry in &mut entries {
            entry.models.sort_by_key(|m| m.priority);
        }
        *self.entries.write() = entries.into_iter().map(Arc::new).collect();
    }

    /// Replace the credential snapshot (admin-triggered reload). Drops any
    /// activation that no longer resolves and publishes `SnapshotReloaded`.
    pub fn replace_snapshot(&self, entries: Vec<KeyEntry>) {
        self.install_snapshot(entries);

        let mut activated = self.activated.write();
        if let Some(id) = activated.clone() {
            if self.find_entry(&id).is_none() {
                *activated = None;
            }
        }
        drop(activated);

        tracing::info!("credential snapshot reloaded");
        self.events.publish(RouterEvent::SnapshotReloaded);
    }

    fn find_entry(&self, key_id: &str) -> Option<Arc<KeyEntry>> {
        self.entries
            .read()
            .iter()
            .find(|e| e.key.id == key_id)
            .cloned()
    }

    /// Ordered (key, model) candidates visible to a tenant: shared keys plus
    /// the tenant's own, enabled keys only. The activated key (if visible)
    /// comes first.
    pub fn list_candidates(&self, tenant_id: &str) -> Vec<Candidate> {
        let activated = self.activated.read().clone();
        let entries = self.entries.read();

        let mut visible: Vec<&Arc<KeyEntry>> = entries
            .iter()
            .filter(|e| e.key.is_enabled())
            .filter(|e| match e.key.scope {
                KeyScope::Shared => true,
                KeyScope::Tenant => e.key.tenant_id.as_deref() == Some(tenant_id),
            })
            .collect();

        if let Some(activated_id) = &activated {
            if let Some(pos) = visible.iter().position(|e| &e.key.id == activated_id) {
                let entry = visible.remove(pos);
                visible.insert(0, entry);
            }
        }

        visible
            .iter()
            .flat_map(|entry| {
                entry.models.iter().map(move |model| Candidate {
                    key_id: entry.key.id.clone(),
                    model_id: model.id.clone(),
                    key_priority: entry.key.priority,
                    model_priority: model.priority,
                    supports_embedding: model.capabilities.supports_embedding,
                    tokens_per_minute: model.capabilities.tokens_per_minute,
                })
            })
            .collect()
    }

    /// Look up the full key and model behind a candidate
    pub fn lookup(
        &self,
        key_id: &str,
        model_id: &str,
    ) -> Option<(Arc<KeyEntry>, Arc<ModelDescriptor>)> {
        let entry = self.find_entry(key_id)?;
        let model = entry.models.iter().find(|m| m.id == model_id)?.clone();
        Some((entry, model))
    }

    /// Whether a key exists and is currently enabled
    pub fn is_enabled(&self, key_id: &str) -> bool {
        self.find_entry(key_id)
            .map(|e| e.key.is_enabled())
            .unwrap_or(false)
    }

    /// Key ids visible to a tenant (shared plus tenant-owned), used by
    /// tenant-scoped exhaustion resets
    pub fn visible_key_ids(&self, tenant_id: &str) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|e| match e.key.scope {
                KeyScope::Shared => true,
                KeyScope::Tenant => e.key.tenant_id.as_deref() == Some(tenant_id),
            })
            .map(|e| e.key.id.clone())
            .collect()
    }

    /// Bulk-enable or disable every key of a scope. Publishes
    /// `KeyScopeToggled` so cached selections referencing the scope are
    /// dropped.
    pub fn set_scope_enabled(&self, scope: KeyScope, enabled: bool) {
        for entry in self.entries.read().iter() {
            if entry.key.scope == scope {
                entry.key.set_enabled(enabled);
            }
        }
        tracing::info!(?scope, enabled, "key scope toggled");
        self.events.publish(RouterEvent::KeyScopeToggled { scope, enabled });
    }

    /// Mark a key as the preferred starting point for future resolutions
    pub fn activate_key(&self, key_id: &str) -> Result<()> {
        if self.find_entry(key_id).is_none() {
            return Err(RouterError::UnknownKey(key_id.to_string()));
        }
        *self.activated.write() = Some(key_id.to_string());
        tracing::info!(key_id, "key activated");
        self.events.publish(RouterEvent::KeyActivated {
            key_id: key_id.to_string(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for KeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRegistry")
            .field("keys", &self.entries.read().len())
            .field("activated", &*self.activated.read())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn model(id: &str, owner: &str, priority: i32) -> Arc<ModelDescriptor> {
        Arc::new(ModelDescriptor {
            id: id.to_string(),
            owner_key_id: owner.to_string(),
            name: id.to_string(),
            priority,
            capabilities: ModelCapabilities::default(),
        })
    }

    pub fn entry(
        id: &str,
        scope: KeyScope,
        tenant: Option<&str>,
        priority: i32,
        models: Vec<Arc<ModelDescriptor>>,
    ) -> KeyEntry {
        KeyEntry {
            key: ProviderKey::new(
                id,
                scope,
                tenant.map(str::to_string),
                format!("secret-{}", id),
                priority,
                Utc::now(),
            ),
            models,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{entry, model};
    use super::*;

    fn registry() -> KeyRegistry {
        let entries = vec![
            entry(
                "shared-b",
                KeyScope::Shared,
                None,
                2,
                vec![model("m3", "shared-b", 1)],
            ),
            entry(
                "shared-a",
                KeyScope::Shared,
                None,
                1,
                vec![model("m2", "shared-a", 2), model("m1", "shared-a", 1)],
            ),
            entry(
                "tenant-x",
                KeyScope::Tenant,
                Some("acme"),
                0,
                vec![model("mx", "tenant-x", 1)],
            ),
        ];
        KeyRegistry::new(entries, Arc::new(EventBus::new()))
    }

    #[test]
    fn test_candidates_ordered_by_priority() {
        let reg = registry();
        let candidates = reg.list_candidates("acme");

        let pairs: Vec<(&str, &str)> = candidates
            .iter()
            .map(|c| (c.key_id.as_str(), c.model_id.as_str()))
            .collect();

        // Tenant key has priority 0, then shared-a with models in model
        // priority order, then shared-b.
        assert_eq!(
            pairs,
            vec![
                ("tenant-x", "mx"),
                ("shared-a", "m1"),
                ("shared-a", "m2"),
                ("shared-b", "m3"),
            ]
        );
    }

    #[test]
    fn test_tenant_key_hidden_from_other_tenants() {
        let reg = registry();
        let candidates = reg.list_candidates("other");
        assert!(candidates.iter().all(|c| c.key_id != "tenant-x"));
    }

    #[test]
    fn test_scope_disable_hides_keys() {
        let reg = registry();
        reg.set_scope_enabled(KeyScope::Shared, false);

        let candidates = reg.list_candidates("acme");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].key_id, "tenant-x");

        reg.set_scope_enabled(KeyScope::Shared, true);
        assert_eq!(reg.list_candidates("acme").len(), 4);
    }

    #[test]
    fn test_activate_key_promotes_to_front() {
        let reg = registry();
        reg.activate_key("shared-b").unwrap();

        let candidates = reg.list_candidates("acme");
        assert_eq!(candidates[0].key_id, "shared-b");
    }

    #[test]
    fn test_activate_unknown_key() {
        let reg = registry();
        assert!(matches!(
            reg.activate_key("nope"),
            Err(RouterError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_activation_event_published() {
        let events = Arc::new(EventBus::new());
        let seen = Arc::new(RwLock::new(Vec::new()));
        let seen_clone = seen.clone();
        events.subscribe(move |e| seen_clone.write().push(e.clone()));

        let reg = KeyRegistry::new(
            vec![entry("k", KeyScope::Shared, None, 0, vec![model("m", "k", 1)])],
            events,
        );
        reg.activate_key("k").unwrap();

        assert_eq!(
            seen.read().as_slice(),
            &[RouterEvent::KeyActivated {
                key_id: "k".to_string()
            }]
        );
    }
}
