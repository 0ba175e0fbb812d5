//! # Embeddings
//!
//! This crate holds the embedding side of the lens retrieval stack: the
//! record model, the cached similarity matrix and the creator similarity
//! graph.
//!
//! ## Features
//!
//! - **Records**: Embeddings with typed scalar metadata
//! - **Vector Cache**: TTL-refreshed, row-normalized snapshot of a vector store
//! - **Similarity**: Cosine similarity accumulated in `f64`
//! - **Graph**: Pairwise thresholded similarity graph over a bounded entity set
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  VectorStore ──► VectorCache ──► Snapshot (unit rows)           │
//! │       │                               │                         │
//! │       ▼                               ▼                         │
//! │  SimilarityGraphBuilder         dot-product search              │
//! │                                                                 │
//! │  EmbeddingEncoder (query text ──► vector)                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod encoder;
pub mod error;
pub mod graph;
pub mod record;
pub mod similarity;
pub mod store;
pub mod vector_cache;

pub use encoder::{EmbeddingEncoder, OpenAIEncoder};
pub use error::{EmbeddingError, Result};
pub use graph::{Graph, GraphConfig, GraphEdge, GraphNode, SimilarityGraphBuilder};
pub use record::{EmbeddingRecord, Metadata, MetadataValue, RecordFilter};
pub use similarity::{cosine_similarity, normalize, round_to};
pub use store::{InMemoryVectorStore, JsonFileVectorStore, VectorStore};
pub use vector_cache::{CacheState, Snapshot, VectorCache, VectorCacheConfig, VectorCacheStats};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings produced by the deployed encoder (bge-small-zh).
pub const DEFAULT_DIMENSION: usize = 512;
