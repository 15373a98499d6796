//! Provider Transport
//!
//! The outbound call seam. `ProviderTransport` is the trait the executor
//! talks to; `HttpTransport` implements it against an OpenAI-style HTTP API
//! with a hard client-level timeout and the error taxonomy the executor's
//! rotation logic depends on.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::api::{ProviderRequest, ProviderResponse, RequestKind, ResponseContent, Usage};
use crate::client::quota::{classify_quota, is_quota_error, parse_retry_after};
use crate::error::{Result, RouterError};
use crate::registry::{ModelDescriptor, ProviderKey};

/// Executes provider calls for a selected (key, model) pair
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    /// Invoke the provider. Must map quota, auth, transient, and timeout
    /// failures onto the corresponding `RouterError` variants.
    async fn invoke(
        &self,
        key: &ProviderKey,
        model: &ModelDescriptor,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse>;

    /// Cheap validation call used before a candidate is trusted for the
    /// first time this process lifetime
    async fn probe(&self, key: &ProviderKey, model: &ModelDescriptor) -> Result<()>;
}

/// HTTP implementation of the provider transport
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// Default hard deadline; sized for the heavier multimodal calls.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(40);

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RouterError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn headers(&self, key: &ProviderKey) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", key.secret_material))
                .map_err(|e| RouterError::Config(format!("invalid key material: {}", e)))?,
        );
        Ok(headers)
    }

    fn build_body(model: &ModelDescriptor, request: &ProviderRequest) -> Result<serde_json::Value> {
        let mut body = match request.kind {
            RequestKind::Generate => serde_json::to_value(request)?,
            RequestKind::Embed => {
                let input: String = request
                    .messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                serde_json::json!({ "input": input })
            }
        };
        if let Some(obj) = body.as_object_mut() {
            obj.remove("kind");
            obj.insert(
                "model".to_string(),
                serde_json::Value::String(model.name.clone()),
            );
        }
        Ok(body)
    }

    /// Map a non-success response onto the error taxonomy. Quota detection
    /// runs first: some providers report quota trouble on 403.
    fn error_for(key: &ProviderKey, status: StatusCode, headers: &HeaderMap, body: &str) -> RouterError {
        if is_quota_error(status.as_u16(), body) {
            return RouterError::QuotaExceeded {
                quota_type: classify_quota(body),
                retry_after: parse_retry_after(headers),
            };
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return RouterError::Authentication {
                key_id: key.id.clone(),
                message: truncate(body, 200),
            };
        }
        if status.is_server_error() {
            return RouterError::TransientProvider {
                status: status.as_u16(),
                message: truncate(body, 200),
            };
        }
        RouterError::Request(format!("status {}: {}", status, truncate(body, 200)))
    }

    async fn post(
        &self,
        path: &str,
        key: &ProviderKey,
        body: &serde_json::Value,
    ) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .headers(self.headers(key)?)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(Self::error_for(key, status, &headers, &text));
        }
        Ok(text)
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        let mut end = limit;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingList {
    #[serde(default)]
    model: Option<String>,
    data: Vec<EmbeddingItem>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[async_trait]
impl ProviderTransport for HttpTransport {
    async fn invoke(
        &self,
        key: &ProviderKey,
        model: &ModelDescriptor,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse> {
        let body = Self::build_body(model, request)?;

        match request.kind {
            RequestKind::Generate => {
                let text = self.post("/chat/completions", key, &body).await?;
                let parsed: ChatCompletion = serde_json::from_str(&text).map_err(|e| {
                    RouterError::Response(format!("bad completion body: {}: {}", e, truncate(&text, 200)))
                })?;
                let content = parsed
                    .choices
                    .first()
                    .and_then(|c| c.message.content.clone())
                    .unwrap_or_default();
                Ok(ProviderResponse {
                    model: parsed.model.unwrap_or_else(|| model.name.clone()),
                    content: ResponseContent::Text(content),
                    usage: parsed.usage,
                })
            }
            RequestKind::Embed => {
                let text = self.post("/embeddings", key, &body).await?;
                let parsed: EmbeddingList = serde_json::from_str(&text).map_err(|e| {
                    RouterError::Response(format!("bad embedding body: {}: {}", e, truncate(&text, 200)))
                })?;
                let embedding = parsed
                    .data
                    .into_iter()
                    .next()
                    .map(|d| d.embedding)
                    .ok_or_else(|| RouterError::Response("empty embedding data".to_string()))?;
                Ok(ProviderResponse {
                    model: parsed.model.unwrap_or_else(|| model.name.clone()),
                    content: ResponseContent::Embedding(embedding),
                    usage: parsed.usage,
                })
            }
        }
    }

    async fn probe(&self, key: &ProviderKey, model: &ModelDescriptor) -> Result<()> {
        let body = serde_json::json!({
            "model": model.name,
            "messages": [{"role": "user", "content": "ping"}],
            "max_tokens": 1,
        });
        self.post("/chat/completions", key, &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Message;
    use crate::registry::{KeyScope, ModelCapabilities};
    use crate::router::exhaustion::QuotaType;
    use chrono::Utc;

    fn key() -> ProviderKey {
        ProviderKey::new("k1", KeyScope::Shared, None, "sk-test", 0, Utc::now())
    }

    fn model() -> ModelDescriptor {
        ModelDescriptor {
            id: "m1".to_string(),
            owner_key_id: "k1".to_string(),
            name: "test-model".to_string(),
            priority: 1,
            capabilities: ModelCapabilities::default(),
        }
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(
                r#"{
                    "model": "test-model",
                    "choices": [{"message": {"role": "assistant", "content": "hello"}}],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
                }"#,
            )
            .create_async()
            .await;

        let transport =
            HttpTransport::new(server.url(), HttpTransport::DEFAULT_TIMEOUT).unwrap();
        let request = ProviderRequest::generation(vec![Message::user("hi")]);

        let response = transport.invoke(&key(), &model(), &request).await.unwrap();
        assert_eq!(response.content.as_text(), Some("hello"));
        assert_eq!(response.tokens_used(), 7);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_quota_rejection_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("retry-after", "30")
            .with_body("Rate limit reached: requests per minute")
            .create_async()
            .await;

        let transport =
            HttpTransport::new(server.url(), HttpTransport::DEFAULT_TIMEOUT).unwrap();
        let request = ProviderRequest::generation(vec![Message::user("hi")]);

        let err = transport.invoke(&key(), &model(), &request).await.unwrap_err();
        match err {
            RouterError::QuotaExceeded {
                quota_type,
                retry_after,
            } => {
                assert_eq!(quota_type, QuotaType::PerMinute);
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("expected QuotaExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_rejection_carries_key_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid api key")
            .create_async()
            .await;

        let transport =
            HttpTransport::new(server.url(), HttpTransport::DEFAULT_TIMEOUT).unwrap();
        let request = ProviderRequest::generation(vec![Message::user("hi")]);

        let err = transport.invoke(&key(), &model(), &request).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::Authentication { ref key_id, .. } if key_id == "k1"
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let transport =
            HttpTransport::new(server.url(), HttpTransport::DEFAULT_TIMEOUT).unwrap();
        let request = ProviderRequest::generation(vec![Message::user("hi")]);

        let err = transport.invoke(&key(), &model(), &request).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::TransientProvider { status: 503, .. }
        ));
    }

    #[tokio::test]
    async fn test_embedding_round() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_body(
                r#"{"data": [{"embedding": [0.1, 0.2]}], "usage": {"total_tokens": 3}}"#,
            )
            .create_async()
            .await;

        let transport =
            HttpTransport::new(server.url(), HttpTransport::DEFAULT_TIMEOUT).unwrap();
        let request = ProviderRequest::embedding("hello");

        let response = transport.invoke(&key(), &model(), &request).await.unwrap();
        match response.content {
            ResponseContent::Embedding(v) => assert_eq!(v, vec![0.1, 0.2]),
            other => panic!("expected embedding, got {:?}", other),
        }
    }
}
