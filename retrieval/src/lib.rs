//! # Lens Retrieval
//!
//! This crate ties the embedding cache and the generative gateway into one
//! service:
//!
//! - **Search**: top-k cosine similarity over the cached corpus, with an
//!   optional metadata score filter
//! - **Chat**: cached, rate-limited generation
//! - **Graph**: thresholded similarity graph over the stored entities
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         LensService                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  search ──► RetrievalEngine ──► VectorCache ──► VectorStore     │
//! │                   │                                             │
//! │                   └──► EmbeddingEncoder                         │
//! │                                                                 │
//! │  chat ──► GenerativeGateway ──► ResponseCache                   │
//! │                   │                                             │
//! │                   └──► TokenBucketLimiter ──► Provider          │
//! │                                                                 │
//! │  build_graph ──► SimilarityGraphBuilder ──► VectorStore         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lens_retrieval::{LensConfig, LensService};
//!
//! let service = LensService::builder()
//!     .with_config(LensConfig::load("lens.toml")?)
//!     .with_store(store)
//!     .build()
//!     .await?;
//!
//! let response = service.search("street food in Chengdu", 10, 0.0).await?;
//! service.close().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod search;

pub use config::{LensConfig, SearchConfig};
pub use engine::{GraphSummary, LensService, LensServiceBuilder, ServiceStats};
pub use error::{LensError, Result};
pub use search::{RetrievalEngine, SearchHit, SearchResponse, SearchStatus};

// Re-export from dependencies for convenience
pub use lens_embeddings::{EmbeddingRecord, Graph, MetadataValue, VectorStore};
pub use lens_gateway::{ChatRequest, ChatResponse};
