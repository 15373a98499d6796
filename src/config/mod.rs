//! Configuration Module
//!
//! Config schema and file-system loader for the credential snapshot and
//! rotation policy.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    BackoffConfig, KeyConfig, ModelConfig, PolicyConfig, ProviderEndpoint, RouterConfig,
};
