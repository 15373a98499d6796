//! Client Module
//!
//! Provider transport trait, HTTP implementation, and quota-error parsing.

pub mod http;
pub mod quota;

pub use http::{HttpTransport, ProviderTransport};
pub use quota::{classify_quota, is_quota_error, parse_duration_string, parse_retry_after};
