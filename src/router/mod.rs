//! Router Module
//!
//! Exhaustion tracking, rotation strategies, the per-tenant selection cache,
//! rotation policy, and usage accounting.

pub mod exhaustion;
pub mod policy;
pub mod selection;
pub mod strategy;
pub mod usage;

pub use exhaustion::{BackoffDefaults, ExhaustionRecord, ExhaustionTracker, QuotaType};
pub use policy::PolicyStore;
pub use selection::{ActiveSelectionCache, SelectionHint};
pub use strategy::{next_candidate, RotationStrategy};
pub use usage::{UsageAccountant, UsageCounter};
