//! Keywheel - Quota-Aware Key/Model Rotation Router
//!
//! Decides, for every outbound call to a rate-limited AI provider, which
//! credential and which model under it should serve the request, and
//! transparently recovers when a candidate is rejected with a quota error.
//! It is an availability/selection layer: it does not interpret model
//! output, enforce spend limits, or guarantee exactly-once delivery.
//!
//! The [`Router`] is the single context object. Construct it once at
//! startup from a [`RouterConfig`] and a transport, share it behind an
//! `Arc`, and call [`Router::execute`] from as many concurrent conversation
//! turns as needed. All routing state is in-memory and process-local; a
//! restart simply clears exhaustion bookkeeping.

use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod registry;
pub mod router;

pub use api::{Message, ProviderRequest, ProviderResponse, RequestKind, ResponseContent, Usage};
pub use client::{HttpTransport, ProviderTransport};
pub use config::{ConfigLoader, RouterConfig};
pub use error::{Result, RouterError};
pub use registry::{Candidate, KeyScope};
pub use router::{QuotaType, RotationStrategy, UsageCounter};

use crate::events::{EventBus, RouterEvent};
use crate::executor::RequestExecutor;
use crate::registry::KeyRegistry;
use crate::router::exhaustion::ExhaustionTracker;
use crate::router::policy::PolicyStore;
use crate::router::selection::ActiveSelectionCache;
use crate::router::usage::UsageAccountant;

/// Filters for an admin exhaustion reset; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct ResetScope {
    pub key_id: Option<String>,
    pub model_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// The rotation router context: owns every component and wires the
/// invalidation event bus
pub struct Router {
    registry: Arc<KeyRegistry>,
    tracker: Arc<ExhaustionTracker>,
    usage: Arc<UsageAccountant>,
    policy: Arc<PolicyStore>,
    cache: Arc<ActiveSelectionCache>,
    events: Arc<EventBus>,
    executor: RequestExecutor,
}

impl Router {
    /// Build a router from a config and a transport
    pub fn new(config: RouterConfig, transport: Arc<dyn ProviderTransport>) -> Result<Self> {
        let events = Arc::new(EventBus::new());

        let registry = Arc::new(KeyRegistry::new(config.to_entries()?, events.clone()));
        let tracker = Arc::new(ExhaustionTracker::new((&config.backoff).into()));
        let usage = Arc::new(UsageAccountant::default());
        let policy = Arc::new(PolicyStore::new(
            config.policy.strategy,
            config.policy.tenant_overrides.clone(),
            events.clone(),
        ));
        let cache = Arc::new(ActiveSelectionCache::new(
            registry.clone(),
            tracker.clone(),
            policy.clone(),
            usage.clone(),
        ));

        // Every admin-side event drops cached selections; the next resolve
        // recomputes lazily.
        let cache_for_events = cache.clone();
        events.subscribe(move |event| match event {
            RouterEvent::KeyScopeToggled { .. }
            | RouterEvent::StrategyChanged
            | RouterEvent::KeyActivated { .. }
            | RouterEvent::ExhaustionReset
            | RouterEvent::SnapshotReloaded => cache_for_events.invalidate_all(),
        });

        let executor = RequestExecutor::new(
            registry.clone(),
            tracker.clone(),
            usage.clone(),
            cache.clone(),
            transport,
        );

        Ok(Self {
            registry,
            tracker,
            usage,
            policy,
            cache,
            events,
            executor,
        })
    }

    /// Build a router from the default config locations with the HTTP
    /// transport
    pub fn from_default_config() -> Result<Self> {
        let config = ConfigLoader::new()?.into_config();
        let transport = Arc::new(HttpTransport::new(
            config.provider.base_url.clone(),
            config.provider.timeout(),
        )?);
        Self::new(config, transport)
    }

    /// Release in-memory routing state. The router is unusable for routing
    /// decisions that depend on history afterwards; intended for orderly
    /// process teardown.
    pub fn shutdown(&self) {
        self.cache.invalidate_all();
        self.tracker.reset(None, None);
    }

    // ---- caller surface -------------------------------------------------

    /// Execute a provider request for a tenant; the primary self-healing
    /// entry point
    pub async fn execute(
        &self,
        tenant_id: &str,
        request: &ProviderRequest,
        predicted_tokens: Option<u64>,
    ) -> Result<ProviderResponse> {
        self.executor.execute(tenant_id, request, predicted_tokens).await
    }

    /// Read-only peek at the candidate the tenant would use next
    pub fn get_active_selection(
        &self,
        tenant_id: &str,
        predicted_tokens: Option<u64>,
    ) -> Result<Candidate> {
        self.executor.active_selection(tenant_id, predicted_tokens)
    }

    /// Feed a quota failure observed outside `execute` back into the shared
    /// tracker
    pub fn report_exhaustion(
        &self,
        tenant_id: &str,
        key_id: &str,
        model_id: &str,
        error_details: &str,
    ) {
        self.executor
            .report_exhaustion(tenant_id, key_id, model_id, error_details);
    }

    /// Usage counters for dashboards
    pub fn usage_snapshot(
        &self,
        key_id: Option<&str>,
        model_id: Option<&str>,
    ) -> Vec<((String, String), UsageCounter)> {
        self.usage.snapshot(key_id, model_id)
    }

    // ---- admin surface --------------------------------------------------

    /// Bulk-enable or disable all keys of a scope
    pub fn set_scope_enabled(&self, scope: KeyScope, enabled: bool) {
        self.registry.set_scope_enabled(scope, enabled);
    }

    /// Change the global rotation strategy
    pub fn set_rotation_strategy(&self, strategy: RotationStrategy) {
        self.policy.set_global(strategy);
    }

    /// Set or clear a per-tenant strategy override
    pub fn set_tenant_strategy(&self, tenant_id: &str, strategy: Option<RotationStrategy>) {
        self.policy.set_tenant(tenant_id, strategy);
    }

    /// Mark a key as the preferred starting point for future resolutions
    pub fn activate_key(&self, key_id: &str) -> Result<()> {
        self.registry.activate_key(key_id)
    }

    /// Clear exhaustion records matching the scope immediately ("reset AI
    /// errors"). A scope matching nothing is a no-op.
    pub fn reset_exhaustion(&self, scope: &ResetScope) {
        match &scope.tenant_id {
            Some(tenant_id) => {
                let key_ids = self.registry.visible_key_ids(tenant_id);
                match &scope.key_id {
                    Some(key_id) if key_ids.contains(key_id) => {
                        self.tracker.reset(Some(key_id), scope.model_id.as_deref());
                    }
                    Some(_) => {}
                    None => self.tracker.reset_keys(&key_ids),
                }
            }
            None => self
                .tracker
                .reset(scope.key_id.as_deref(), scope.model_id.as_deref()),
        }
        self.events.publish(RouterEvent::ExhaustionReset);
    }

    /// Replace the credential snapshot from a fresh config (admin reload)
    pub fn reload_keys(&self, config: &RouterConfig) -> Result<()> {
        self.registry.replace_snapshot(config.to_entries()?);
        Ok(())
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("registry", &self.registry)
            .field("tracker", &self.tracker)
            .finish()
    }
}

/// Install a `tracing` subscriber honoring `RUST_LOG`, for binaries that
/// have not set one up themselves
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
