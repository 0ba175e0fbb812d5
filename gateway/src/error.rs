//! Error types for the generative gateway.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur in the gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// The provider rejected or failed the call.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// No tokens became available before the caller's deadline.
    #[error("rate limit wait exceeded {0:?}")]
    RateLimitTimeout(Duration),

    /// A request asked for more tokens than the bucket can ever hold.
    #[error("requested {requested} tokens but bucket capacity is {capacity}")]
    ExceedsCapacity { requested: u32, capacity: u32 },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Response cache persistence failed.
    #[error("cache error: {0}")]
    Cache(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a generative provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provider not configured (missing API key).
    #[error("provider not configured")]
    NotConfigured,

    /// Upstream quota or rate limit hit.
    #[error("quota exceeded: {0}")]
    Quota(String),

    /// The call did not finish before its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The request was rejected as invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Any other upstream failure, with the provider's message.
    #[error("{0}")]
    Upstream(String),

    /// Transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
