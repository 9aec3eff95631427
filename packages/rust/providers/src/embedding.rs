//! Text embeddings via an OpenAI-compatible `/embeddings` endpoint.
//!
//! [`EmbeddingClient`] is the degrading wrapper used by the pipeline: it
//! truncates input, and turns a missing key or any provider failure into an
//! empty vector instead of an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use marketlore_shared::text::truncate_chars;
use marketlore_shared::{EmbeddingConfig, MarketloreError, Result, RetryPolicy};

use crate::is_transient_status;

const EMBEDDINGS_PATH: &str = "/embeddings";

/// Converts text into a fixed-length vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// HTTP client for `POST {base}/embeddings`.
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    dimension: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbeddingProvider {
    /// Build a provider from runtime config. A missing API key is a config error.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            MarketloreError::config(
                "embedding API key not found. Set the environment variable named by [embedding].api_key_env.",
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MarketloreError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: format!("{}{EMBEDDINGS_PATH}", config.base_url.trim_end_matches('/')),
            dimension: config.dimensions,
            retry: config.retry,
        })
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        // Only the text-embedding-3 family accepts a reduced output size.
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimension);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| MarketloreError::Unavailable(format!("embedding request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "embedding API returned HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            );
            return Err(if is_transient_status(status) {
                MarketloreError::Unavailable(message)
            } else {
                MarketloreError::Embedding(message)
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| MarketloreError::Embedding(format!("invalid response: {e}")))?;
        parsed.data.sort_by_key(|d| d.index);

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MarketloreError::Embedding("response contained no vectors".into()))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = self.request_body(text);
        let vector = self.retry.run("embedding", || self.send(&body)).await?;

        if vector.len() != self.dimension {
            return Err(MarketloreError::Embedding(format!(
                "expected {} dimensions, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Degrading embedding front-end shared by ingestion and retrieval.
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    max_input_chars: usize,
}

impl EmbeddingClient {
    /// Build from config; without credentials the client is disabled.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        match OpenAiEmbeddingProvider::new(config) {
            Ok(provider) => Self::with_provider(Arc::new(provider), config.max_input_chars),
            Err(e) => {
                warn!(error = %e, "embeddings disabled");
                Self::disabled()
            }
        }
    }

    pub fn with_provider(provider: Arc<dyn EmbeddingProvider>, max_input_chars: usize) -> Self {
        Self {
            provider: Some(provider),
            max_input_chars,
        }
    }

    /// A client that always returns an empty vector.
    pub fn disabled() -> Self {
        Self {
            provider: None,
            max_input_chars: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Embed `text`, truncated to the configured limit.
    ///
    /// Returns an empty vector when disabled, for blank input, or on any
    /// provider failure.
    pub async fn embed(&self, text: &str) -> Vec<f32> {
        let Some(provider) = &self.provider else {
            return Vec::new();
        };
        let input = truncate_chars(text.trim(), self.max_input_chars);
        if input.is_empty() {
            return Vec::new();
        }

        match provider.embed(input).await {
            Ok(vector) => {
                debug!(chars = input.chars().count(), dims = vector.len(), "embedded text");
                vector
            }
            Err(e) => {
                warn!(error = %e, "embedding failed, continuing without vector");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str, key: Option<&str>, dims: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: base.to_string(),
            api_key: key.map(str::to_string),
            model: "text-embedding-3-small".into(),
            dimensions: dims,
            max_input_chars: 8000,
            concurrency: 4,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(3, Duration::from_millis(1)),
        }
    }

    struct RecordingProvider {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![0.5; 3])
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn disabled_client_returns_empty() {
        let client = EmbeddingClient::from_config(&config("http://unused", None, 3));
        assert!(!client.is_enabled());
        assert!(client.embed("hello").await.is_empty());
    }

    #[tokio::test]
    async fn input_is_truncated() {
        let provider = Arc::new(RecordingProvider {
            seen: Mutex::new(Vec::new()),
        });
        let client = EmbeddingClient::with_provider(provider.clone(), 8000);
        let long = "あ".repeat(9000);
        let v = client.embed(&long).await;
        assert_eq!(v.len(), 3);
        assert_eq!(provider.seen.lock().unwrap()[0].chars().count(), 8000);

        assert!(client.embed("   ").await.is_empty());
        assert_eq!(provider.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn calls_openai_compatible_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("authorization", "Bearer sk-embed"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": "reels tips",
                "dimensions": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = EmbeddingClient::from_config(&config(&server.uri(), Some("sk-embed"), 3));
        assert_eq!(client.embed("reels tips").await, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn provider_failure_degrades_to_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = EmbeddingClient::from_config(&config(&server.uri(), Some("k"), 3));
        assert!(client.is_enabled());
        assert!(client.embed("text").await.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_embedding_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.4, 0.5, 0.6], "index": 0}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new(&config(&server.uri(), Some("k"), 3)).unwrap();
        assert_eq!(provider.embed("x").await.unwrap(), vec![0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn unauthorized_embedding_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new(&config(&server.uri(), Some("k"), 3)).unwrap();
        let err = provider.embed("x").await.unwrap_err();
        assert!(matches!(err, MarketloreError::Embedding(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2], "index": 0}]
            })))
            .mount(&server)
            .await;

        let provider = OpenAiEmbeddingProvider::new(&config(&server.uri(), Some("k"), 3)).unwrap();
        let err = provider.embed("x").await.unwrap_err();
        assert!(matches!(err, MarketloreError::Embedding(_)));
    }
}
