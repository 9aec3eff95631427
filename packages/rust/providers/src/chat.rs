//! Chat-completion client for OpenAI-compatible endpoints (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use marketlore_shared::{LlmConfig, MarketloreError, Result, RetryPolicy};

use crate::is_transient_status;

const COMPLETIONS_PATH: &str = "/chat/completions";

/// A single-turn chat completion: system prompt plus one user message.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Model identifier, recorded alongside distilled output.
    fn model(&self) -> &str;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP client for `POST {base}/chat/completions`.
pub struct OpenRouterChatClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    url: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
}

impl OpenRouterChatClient {
    /// Build a client from runtime config. A missing API key is a config error.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            MarketloreError::config(
                "LLM API key not found. Set the environment variable named by [llm].api_key_env.\n\
                 Get a key at https://openrouter.ai/keys",
            )
        })?;

        let client = reqwest::Client::builder()
            .timeout(if config.timeout.is_zero() {
                Duration::from_secs(60)
            } else {
                config.timeout
            })
            .build()
            .map_err(|e| MarketloreError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            url: format!("{}{COMPLETIONS_PATH}", config.base_url.trim_end_matches('/')),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            retry: config.retry,
        })
    }

    /// One POST. Transport errors, 429 and 5xx come back as `Unavailable`.
    async fn send(&self, request: &ApiRequest<'_>) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "marketlore")
            .json(request)
            .send()
            .await
            .map_err(|e| MarketloreError::Unavailable(format!("chat request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!(
                "chat API returned HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            );
            return Err(if is_transient_status(status) {
                MarketloreError::Unavailable(message)
            } else {
                MarketloreError::Distillation(message)
            });
        }

        let parsed: ApiResponse = response.json().await.map_err(|e| {
            MarketloreError::Distillation(format!("invalid chat API response: {e}"))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| MarketloreError::Distillation("chat API returned no content".into()))
    }
}

#[async_trait]
impl ChatClient for OpenRouterChatClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ApiRequest {
            model: &self.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: system,
                },
                ApiMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let content = self
            .retry
            .run("chat completion", || self.send(&request))
            .await?;

        debug!(model = %self.model, chars = content.len(), "chat completion received");
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
