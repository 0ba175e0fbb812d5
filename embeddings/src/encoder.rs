//! Query encoders.
//!
//! The embedding model itself is external; an [`EmbeddingEncoder`] only turns
//! query text into a vector of the deployment's dimension.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};

/// Trait for embedding encoders.
///
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait EmbeddingEncoder: Send + Sync {
    /// Get the name of this encoder.
    fn name(&self) -> &str;

    /// Dimension of the vectors this encoder produces.
    fn dimension(&self) -> usize;

    /// Encode text into a vector.
    async fn encode(&self, text: &str) -> Result<Embedding>;

    /// Check if the encoder is usable (API key set, model loaded, etc.).
    fn is_available(&self) -> bool;
}

/// Encoder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAIEncoder {
    /// API key.
    api_key: Option<String>,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Model name.
    model: String,

    /// Requested output dimension.
    dimension: usize,
}

impl OpenAIEncoder {
    /// Create a new encoder, reading the key from `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
            dimension: crate::DEFAULT_DIMENSION,
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

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the requested output dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }
}

impl Default for OpenAIEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingEncoder for OpenAIEncoder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn encode(&self, text: &str) -> Result<Embedding> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(EmbeddingError::EncoderNotConfigured)?;

        debug!("Encoding query with model: {}", self.model);

        let body = serde_json::json!({
            "input": text,
            "model": self.model,
            "dimensions": self.dimension,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest(format!(
                "API error ({status}): {error_text}"
            )));
        }

        let result: OpenAIEmbeddingResponse = response.json().await?;

        let embedding = result
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("No embedding in response".to_string()))?
            .embedding;

        if embedding.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_encode_reads_first_embedding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2, 0.3], "index": 0 }],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let encoder = OpenAIEncoder::new()
            .with_api_key("test-key")
            .with_base_url(server.uri())
            .with_dimension(3);

        let embedding = encoder.encode("hello").await.unwrap();
        assert_eq!(embedding, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_encode_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "embedding": [0.1, 0.2] }]
            })))
            .mount(&server)
            .await;

        let encoder = OpenAIEncoder::new()
            .with_api_key("k")
            .with_base_url(server.uri())
            .with_dimension(3);

        let err = encoder.encode("hello").await.unwrap_err();
        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_encode_surfaces_api_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let encoder = OpenAIEncoder::new()
            .with_api_key("k")
            .with_base_url(server.uri());

        let err = encoder.encode("hello").await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_unconfigured_encoder_is_unavailable() {
        let encoder = OpenAIEncoder {
            api_key: None,
            base_url: String::new(),
            client: reqwest::Client::new(),
            model: String::new(),
            dimension: 4,
        };
        assert!(!encoder.is_available());
    }
}
