//! Keywheel Error Types
//!
//! Error taxonomy for the rotation router. Quota and transient errors are
//! normally absorbed by the executor's bounded rotation; callers see either a
//! response, `NoCandidateAvailable`, or a final terminal error.

use std::time::Duration;

use thiserror::Error;

use crate::router::exhaustion::QuotaType;

/// Main error type for router operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Configuration errors (invalid JSON, missing fields, unreadable files)
    #[error("configuration error: {0}")]
    Config(String),

    /// A key id that is not present in the registry
    #[error("unknown key '{0}'")]
    UnknownKey(String),

    /// The provider rejected the call with a quota error
    #[error("quota exceeded ({quota_type}), retry after {retry_after:?}")]
    QuotaExceeded {
        quota_type: QuotaType,
        retry_after: Option<Duration>,
    },

    /// A retryable provider failure (5xx, connection reset)
    #[error("transient provider error (status {status}): {message}")]
    TransientProvider { status: u16, message: String },

    /// The credential itself was rejected
    #[error("authentication failed for key '{key_id}': {message}")]
    Authentication { key_id: String, message: String },

    /// The provider call exceeded its deadline
    #[error("provider request timed out: {0}")]
    Timeout(String),

    /// Every candidate in the tenant's pool is exhausted or disabled
    #[error("no selectable key/model candidate for tenant '{tenant_id}'")]
    NoCandidateAvailable { tenant_id: String },

    /// HTTP request failed for a non-retryable reason
    #[error("request failed: {0}")]
    Request(String),

    /// Response parsing failed
    #[error("response error: {0}")]
    Response(String),
}

impl From<reqwest::Error> for RouterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RouterError::Timeout(err.to_string())
        } else if err.is_connect() {
            RouterError::TransientProvider {
                status: 0,
                message: format!("connection failed: {}", err),
            }
        } else if err.is_decode() {
            RouterError::Response(format!("failed to decode response: {}", err))
        } else {
            RouterError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Response(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
