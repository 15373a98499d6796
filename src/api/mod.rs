//! API Module
//!
//! Request/response types for the provider call contract.

pub mod completion;

pub use completion::{
    Message, ProviderRequest, ProviderResponse, RequestKind, ResponseContent, Usage,
};
