//! Registry Module
//!
//! Provider credentials, their models, and tenant-visible candidate listing.

pub mod keys;

pub use keys::{
    Candidate, KeyRegistry, KeyScope, ModelCapabilities, ModelDescriptor, ProviderKey,
};
