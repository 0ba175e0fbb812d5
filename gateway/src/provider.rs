//! Generative AI providers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ProviderError;

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The (already compressed) prompt.
    pub prompt: String,

    /// Model name.
    pub model: String,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Sampling temperature.
    pub temperature: f32,
}

/// Token accounting for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,

    /// Tokens generated.
    pub completion_tokens: u64,
}

impl TokenUsage {
    /// Prompt plus completion tokens.
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A successful completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text.
    pub text: String,

    /// Token usage reported by the provider.
    pub usage: TokenUsage,
}

/// Trait for generative providers.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Run one completion. Implementations must not retry.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    /// Check if the provider is usable (API key set, etc.).
    fn is_available(&self) -> bool;
}

/// Provider for OpenAI-compatible `/chat/completions` endpoints (DeepSeek by default).
pub struct OpenAIChatProvider {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Per-request timeout.
    timeout: Duration,
}

impl OpenAIChatProvider {
    /// Create a provider, reading the key from `DEEPSEEK_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("DEEPSEEK_API_KEY").ok(),
            base_url: "https://api.deepseek.com".to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for OpenAIChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerativeProvider for OpenAIChatProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let api_key = self.api_key.as_ref().ok_or(ProviderError::NotConfigured)?;

        debug!(
            "Requesting completion from {} (model: {}, max_tokens: {})",
            self.base_url, request.model, request.max_tokens
        );

        let body = serde_json::json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(self.timeout)
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                reqwest::StatusCode::TOO_MANY_REQUESTS | reqwest::StatusCode::PAYMENT_REQUIRED => {
                    ProviderError::Quota(error_text)
                }
                reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNPROCESSABLE_ENTITY => {
                    ProviderError::InvalidInput(error_text)
                }
                _ => ProviderError::Upstream(format!("API error ({status}): {error_text}")),
            });
        }

        let result: ChatCompletionResponse = response.json().await?;

        let text = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Upstream("No completion in response".to_string()))?;

        let usage = result.usage.unwrap_or_default();
        info!(
            "Completion received: {} tokens (prompt {} + completion {})",
            usage.total(),
            usage.prompt_tokens,
            usage.completion_tokens
        );

        Ok(Completion { text, usage })
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Chat completion response format.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
