//! Configuration Loader
//!
//! Loads and merges router configuration from the file system. Later
//! sources override earlier ones key-by-key, so a local file can add keys
//! to a base config without repeating it.

use std::path::{Path, PathBuf};

use crate::config::schema::RouterConfig;
use crate::error::{Result, RouterError};

pub struct ConfigLoader {
    config: RouterConfig,
}

impl ConfigLoader {
    /// Load from the default locations, merging every file that exists
    pub fn new() -> Result<Self> {
        // Pick up secrets from a local .env before resolving secret_env refs.
        let _ = dotenvy::dotenv();

        let mut loader = Self {
            config: RouterConfig::default(),
        };
        for path in Self::config_paths() {
            if path.exists() {
                loader.load_from_file(&path)?;
            }
        }
        Ok(loader)
    }

    /// Load a specific config file only
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut loader = Self {
            config: RouterConfig::default(),
        };
        loader.load_from_file(path)?;
        Ok(loader)
    }

    /// Candidate config paths, in merge order
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("keywheel").join("config.json"));
        }
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".keywheel").join("config.json"));
        }
        paths.push(PathBuf::from("keywheel.json"));

        // Highest precedence: explicit override.
        if let Ok(custom) = std::env::var("KEYWHEEL_CONFIG_PATH") {
            paths.push(PathBuf::from(custom));
        }

        paths
    }

    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let config: RouterConfig = serde_json::from_str(&content).map_err(|e| {
            RouterError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        self.merge(config);
        Ok(())
    }

    /// Merge another config into this one; later keys override earlier ones
    /// with the same id, everything else is replaced wholesale when present
    fn merge(&mut self, other: RouterConfig) {
        for key in other.keys {
            match self.config.keys.iter_mut().find(|k| k.id == key.id) {
                Some(existing) => *existing = key,
                None => self.config.keys.push(key),
            }
        }

        self.config.provider = other.provider;
        self.config.backoff = other.backoff;
        self.config.policy.strategy = other.policy.strategy;
        self.config
            .policy
            .tenant_overrides
            .extend(other.policy.tenant_overrides);
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn into_config(self) -> RouterConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(json: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", json).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"{
                "provider": {"base_url": "https://example.test/v1"},
                "keys": [{"id": "k1", "secret": "s1", "models": [{"id": "m1"}]}]
            }"#,
        );

        let loader = ConfigLoader::from_path(file.path()).unwrap();
        assert_eq!(loader.config().provider.base_url, "https://example.test/v1");
        assert_eq!(loader.config().keys.len(), 1);
    }

    #[test]
    fn test_merge_overrides_by_key_id() {
        let file = write_config(
            r#"{"keys": [
                {"id": "k1", "secret": "old", "models": []},
                {"id": "k2", "secret": "s2", "models": []}
            ]}"#,
        );
        let mut loader = ConfigLoader::from_path(file.path()).unwrap();

        let update: RouterConfig = serde_json::from_str(
            r#"{"keys": [{"id": "k1", "secret": "new", "models": []}]}"#,
        )
        .unwrap();
        loader.merge(update);

        assert_eq!(loader.config().keys.len(), 2);
        let k1 = loader.config().keys.iter().find(|k| k.id == "k1").unwrap();
        assert_eq!(k1.secret.as_deref(), Some("new"));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let file = write_config("{not json");
        assert!(matches!(
            ConfigLoader::from_path(file.path()),
            Err(RouterError::Config(_))
        ));
    }
}
