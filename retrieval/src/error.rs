//! Error types for the lens service.

use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, LensError>;

/// Errors that can occur in the lens service.
#[derive(Error, Debug)]
pub enum LensError {
    /// Embedding error.
    #[error("embedding error: {0}")]
    Embedding(#[from] lens_embeddings::EmbeddingError),

    /// Gateway error.
    #[error("gateway error: {0}")]
    Gateway(#[from] lens_gateway::GatewayError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed configuration file.
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    /// A collaborator failed the startup readiness check.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The service has been closed.
    #[error("service is closed")]
    Closed,

    /// A background build task panicked or was cancelled.
    #[error("graph build failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
