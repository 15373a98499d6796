//! Provider Call Types
//!
//! The request/response shapes of the underlying provider call. The wire
//! format is OpenAI-style JSON; the router only cares about token-usage
//! metadata and the text-or-embedding payload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A message in a conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// What kind of provider call this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Generate,
    Embed,
}

/// A provider request as callers hand it to the router. The model name is
/// filled in by the transport from the selected candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub kind: RequestKind,

    /// Conversation messages (generation) or input text (embedding)
    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Provider-specific parameters passed through verbatim
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderRequest {
    pub fn generation(messages: Vec<Message>) -> Self {
        Self {
            kind: RequestKind::Generate,
            messages,
            temperature: None,
            max_tokens: None,
            extra: HashMap::new(),
        }
    }

    pub fn embedding(input: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Embed,
            messages: vec![Message::user(input)],
            temperature: None,
            max_tokens: None,
            extra: HashMap::new(),
        }
    }
}

/// Token usage metadata reported by the provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// The payload of a successful provider call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseContent {
    Text(String),
    Embedding(Vec<f32>),
}

impl ResponseContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseContent::Text(s) => Some(s),
            ResponseContent::Embedding(_) => None,
        }
    }
}

/// A provider response with usage metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The model that actually served the request
    pub model: String,

    pub content: ResponseContent,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ProviderResponse {
    /// Total tokens consumed, zero when the provider reported nothing
    pub fn tokens_used(&self) -> u64 {
        self.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serializes_extra_flat() {
        let mut request = ProviderRequest::generation(vec![Message::user("hi")]);
        request
            .extra
            .insert("top_p".to_string(), serde_json::json!(0.9));

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["top_p"], serde_json::json!(0.9));
        assert_eq!(value["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_tokens_used_defaults_to_zero() {
        let response = ProviderResponse {
            model: "m".to_string(),
            content: ResponseContent::Text("ok".to_string()),
            usage: None,
        };
        assert_eq!(response.tokens_used(), 0);
    }
}
