//! Request Executor
//!
//! The self-healing entry point. Resolves a (key, model) selection, runs the
//! provider call, and on failure rotates through the pool under strict
//! bounds: one quota-triggered rotation retry, one transient retry, and
//! auth-failed keys are never retried in the same call chain. Side effects
//! are confined to the exhaustion tracker, the usage accountant, and the
//! selection cache.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::api::{ProviderRequest, ProviderResponse, RequestKind};
use crate::client::http::ProviderTransport;
use crate::client::quota::classify_quota;
use crate::error::{Result, RouterError};
use crate::registry::{Candidate, KeyRegistry};
use crate::router::exhaustion::ExhaustionTracker;
use crate::router::selection::{ActiveSelectionCache, SelectionHint};
use crate::router::usage::UsageAccountant;

pub struct RequestExecutor {
    registry: Arc<KeyRegistry>,
    tracker: Arc<ExhaustionTracker>,
    usage: Arc<UsageAccountant>,
    cache: Arc<ActiveSelectionCache>,
    transport: Arc<dyn ProviderTransport>,

    /// Pairs health-probed this process lifetime
    validated: RwLock<HashSet<(String, String)>>,

    /// Fixed delay before the single transient retry
    transient_retry_delay: Duration,
}

impl RequestExecutor {
    pub fn new(
        registry: Arc<KeyRegistry>,
        tracker: Arc<ExhaustionTracker>,
        usage: Arc<UsageAccountant>,
        cache: Arc<ActiveSelectionCache>,
        transport: Arc<dyn ProviderTransport>,
    ) -> Self {
        Self {
            registry,
            tracker,
            usage,
            cache,
            transport,
            validated: RwLock::new(HashSet::new()),
            transient_retry_delay: Duration::from_millis(500),
        }
    }

    fn no_candidate(tenant_id: &str) -> RouterError {
        RouterError::NoCandidateAvailable {
            tenant_id: tenant_id.to_string(),
        }
    }

    /// Read-only peek at the candidate a request would use, for callers
    /// that run their own retry loop
    pub fn active_selection(
        &self,
        tenant_id: &str,
        predicted_tokens: Option<u64>,
    ) -> Result<Candidate> {
        let hint = SelectionHint {
            predicted_tokens,
            needs_embedding: false,
        };
        self.cache
            .resolve(tenant_id, &hint)
            .ok_or_else(|| Self::no_candidate(tenant_id))
    }

    /// Feed an externally observed quota failure into the shared tracker
    pub fn report_exhaustion(
        &self,
        tenant_id: &str,
        key_id: &str,
        model_id: &str,
        error_details: &str,
    ) {
        let quota_type = classify_quota(error_details);
        info!(tenant_id, key_id, model_id, %quota_type, "external exhaustion report");
        self.tracker.mark_exhausted(key_id, model_id, quota_type, None);
        self.cache.invalidate(tenant_id);
    }

    /// Execute a provider request for a tenant, rotating on quota or auth
    /// failures. Returns the response, or `NoCandidateAvailable` once the
    /// pool is out of options.
    pub async fn execute(
        &self,
        tenant_id: &str,
        request: &ProviderRequest,
        predicted_tokens: Option<u64>,
    ) -> Result<ProviderResponse> {
        let hint = SelectionHint {
            predicted_tokens,
            needs_embedding: request.kind == RequestKind::Embed,
        };

        let mut quota_rotations = 0u32;
        let mut transient_retries = 0u32;
        // Auth failures rotate through keys without counting as retries, so
        // bound the loop by the pool size.
        let max_attempts = self.registry.list_candidates(tenant_id).len().max(1) + 2;

        for _ in 0..max_attempts {
            let Some(candidate) = self.cache.resolve(tenant_id, &hint) else {
                return Err(Self::no_candidate(tenant_id));
            };
            let Some((entry, model)) =
                self.registry.lookup(&candidate.key_id, &candidate.model_id)
            else {
                // Snapshot reloaded between resolve and lookup.
                self.cache.invalidate(tenant_id);
                continue;
            };
            let key = &entry.key;
            let pair = (candidate.key_id.clone(), candidate.model_id.clone());

            let outcome = if self.validated.read().contains(&pair) {
                self.transport.invoke(key, &model, request).await
            } else {
                match self.transport.probe(key, &model).await {
                    Ok(()) => {
                        debug!(key_id = %pair.0, model_id = %pair.1, "candidate validated");
                        self.validated.write().insert(pair.clone());
                        self.transport.invoke(key, &model, request).await
                    }
                    Err(e) => Err(e),
                }
            };

            match outcome {
                Ok(response) => {
                    self.usage
                        .record(&candidate.key_id, &candidate.model_id, response.tokens_used());
                    return Ok(response);
                }
                Err(RouterError::QuotaExceeded {
                    quota_type,
                    retry_after,
                }) => {
                    let recover_at = self.tracker.mark_exhausted(
                        &candidate.key_id,
                        &candidate.model_id,
                        quota_type,
                        retry_after,
                    );
                    self.cache.invalidate(tenant_id);
                    info!(
                        tenant_id,
                        key_id = %candidate.key_id,
                        model_id = %candidate.model_id,
                        %quota_type,
                        %recover_at,
                        "quota rejection, rotating"
                    );
                    if quota_rotations >= 1 {
                        return Err(Self::no_candidate(tenant_id));
                    }
                    quota_rotations += 1;
                    // The next resolve rotates from this position and pins
                    // the new candidate for subsequent requests.
                }
                Err(RouterError::Authentication { key_id, message }) => {
                    warn!(tenant_id, key_id, message, "credential rejected, retiring key");
                    self.tracker.mark_key_unusable(&key_id);
                    self.cache.invalidate(tenant_id);
                }
                Err(err @ (RouterError::TransientProvider { .. } | RouterError::Timeout(_))) => {
                    // Not evidence of exhaustion; the tracker stays untouched
                    // and the same selection is retried once.
                    if transient_retries >= 1 {
                        return Err(err);
                    }
                    transient_retries += 1;
                    debug!(tenant_id, error = %err, "transient failure, retrying");
                    tokio::time::sleep(self.transient_retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }

        Err(Self::no_candidate(tenant_id))
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("validated", &self.validated.read().len())
            .finish()
    }
}
