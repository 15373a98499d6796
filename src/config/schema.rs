//! Configuration Schema
//!
//! Serde schema for the router's JSON configuration: the provider endpoint,
//! the credential snapshot, rotation policy, and backoff defaults.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};
use crate::registry::keys::KeyEntry;
use crate::registry::{KeyScope, ModelCapabilities, ModelDescriptor, ProviderKey};
use crate::router::exhaustion::BackoffDefaults;
use crate::router::strategy::RotationStrategy;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default)]
    pub provider: ProviderEndpoint,

    #[serde(default)]
    pub keys: Vec<KeyConfig>,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Where and how to reach the provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub base_url: String,

    /// Hard per-call deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    40
}

impl Default for ProviderEndpoint {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderEndpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One provider credential in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyConfig {
    pub id: String,

    #[serde(default = "default_scope")]
    pub scope: KeyScope,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Literal secret; prefer `secret_env` outside of tests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Environment variable holding the secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_env: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

fn default_scope() -> KeyScope {
    KeyScope::Shared
}

fn default_true() -> bool {
    true
}

impl KeyConfig {
    /// Resolve the secret, preferring the literal over the env indirection
    pub fn secret_material(&self) -> Result<String> {
        if let Some(secret) = &self.secret {
            return Ok(secret.clone());
        }
        if let Some(env) = &self.secret_env {
            return std::env::var(env).map_err(|_| {
                RouterError::Config(format!(
                    "key '{}': env var '{}' is not set",
                    self.id, env
                ))
            });
        }
        Err(RouterError::Config(format!(
            "key '{}' has neither 'secret' nor 'secret_env'",
            self.id
        )))
    }
}

/// One model under a key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,

    /// Wire name; defaults to the id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub capabilities: ModelCapabilities,
}

/// Rotation strategy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub strategy: RotationStrategy,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tenant_overrides: HashMap<String, RotationStrategy>,
}

/// Backoff defaults for quota types without a calendar boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_per_minute_secs")]
    pub per_minute_secs: u64,

    #[serde(default = "default_unknown_secs")]
    pub unknown_secs: u64,
}

fn default_per_minute_secs() -> u64 {
    60
}

fn default_unknown_secs() -> u64 {
    300
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            per_minute_secs: default_per_minute_secs(),
            unknown_secs: default_unknown_secs(),
        }
    }
}

impl From<&BackoffConfig> for BackoffDefaults {
    fn from(config: &BackoffConfig) -> Self {
        Self {
            per_minute: Duration::from_secs(config.per_minute_secs),
            unknown: Duration::from_secs(config.unknown_secs),
        }
    }
}

impl RouterConfig {
    /// Build the registry snapshot, resolving secrets
    pub fn to_entries(&self) -> Result<Vec<KeyEntry>> {
        self.keys
            .iter()
            .map(|kc| {
                if kc.scope == KeyScope::Tenant && kc.tenant_id.is_none() {
                    return Err(RouterError::Config(format!(
                        "key '{}' is tenant-scoped but has no tenant_id",
                        kc.id
                    )));
                }

                let key = ProviderKey::new(
                    kc.id.clone(),
                    kc.scope,
                    kc.tenant_id.clone(),
                    kc.secret_material()?,
                    kc.priority,
                    kc.created_at.unwrap_or_else(Utc::now),
                );
                key.set_enabled(kc.enabled);

                let models = kc
                    .models
                    .iter()
                    .map(|mc| {
                        Arc::new(ModelDescriptor {
                            id: mc.id.clone(),
                            owner_key_id: kc.id.clone(),
                            name: mc.name.clone().unwrap_or_else(|| mc.id.clone()),
                            priority: mc.priority,
                            capabilities: mc.capabilities.clone(),
                        })
                    })
                    .collect();

                Ok(KeyEntry { key, models })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_config() {
        let json = r#"{
            "keys": [{
                "id": "k1",
                "secret": "sk-test",
                "models": [{"id": "gpt", "priority": 1}]
            }]
        }"#;

        let config: RouterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.keys.len(), 1);
        assert_eq!(config.keys[0].scope, KeyScope::Shared);
        assert!(config.keys[0].enabled);
        assert_eq!(config.provider.timeout_secs, 40);
        assert_eq!(config.backoff.unknown_secs, 300);

        let entries = config.to_entries().unwrap();
        assert_eq!(entries[0].key.secret_material, "sk-test");
        assert_eq!(entries[0].models[0].name, "gpt");
    }

    #[test]
    fn test_secret_env_resolution() {
        std::env::set_var("KEYWHEEL_TEST_SECRET", "sk-from-env");
        let kc = KeyConfig {
            id: "k".to_string(),
            scope: KeyScope::Shared,
            tenant_id: None,
            secret: None,
            secret_env: Some("KEYWHEEL_TEST_SECRET".to_string()),
            enabled: true,
            priority: 0,
            created_at: None,
            models: vec![],
        };
        assert_eq!(kc.secret_material().unwrap(), "sk-from-env");

        std::env::remove_var("KEYWHEEL_TEST_SECRET");
        assert!(kc.secret_material().is_err());
    }

    #[test]
    fn test_tenant_key_requires_tenant_id() {
        let json = r#"{
            "keys": [{"id": "k1", "scope": "tenant", "secret": "s"}]
        }"#;
        let config: RouterConfig = serde_json::from_str(json).unwrap();
        assert!(matches!(
            config.to_entries(),
            Err(RouterError::Config(_))
        ));
    }
}
