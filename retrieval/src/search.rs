//! Top-k similarity search over the vector cache.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lens_embeddings::{
    CacheState, EmbeddingEncoder, EmbeddingError, Metadata, MetadataValue, VectorCache,
    normalize, round_to,
};

use crate::config::SearchConfig;
use crate::error::Result;

/// Why a search returned what it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchStatus {
    /// The corpus was searched.
    Ok,

    /// The corpus is empty.
    NoCorpus,

    /// The vector store is down and nothing is cached.
    Unavailable { reason: String },
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Record id.
    pub id: String,

    /// Cosine similarity to the query, rounded.
    pub similarity: f64,

    /// Record metadata.
    pub metadata: Metadata,
}

/// Search results with bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// The query text.
    pub query: String,

    /// Hits, most similar first.
    pub results: Vec<SearchHit>,

    /// Number of hits.
    pub total: usize,

    /// Rows in the searched snapshot.
    pub index_size: usize,

    /// Wall time spent in the search.
    pub search_time_ms: f64,

    /// Outcome of the search.
    #[serde(flatten)]
    pub status: SearchStatus,

    /// Whether the snapshot was kept after a failed refresh.
    pub stale: bool,
}

impl SearchResponse {
    fn empty(query: &str, status: SearchStatus, started: Instant) -> Self {
        Self {
            query: query.to_string(),
            results: Vec::new(),
            total: 0,
            index_size: 0,
            search_time_ms: elapsed_ms(started),
            status,
            stale: false,
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    round_to(started.elapsed().as_secs_f64() * 1000.0, 2)
}

/// Encodes queries and ranks cached rows against them.
pub struct RetrievalEngine {
    cache: Arc<VectorCache>,
    encoder: Arc<dyn EmbeddingEncoder>,
    config: SearchConfig,
}

impl RetrievalEngine {
    /// Create an engine over a cache.
    pub fn new(
        cache: Arc<VectorCache>,
        encoder: Arc<dyn EmbeddingEncoder>,
        config: SearchConfig,
    ) -> Self {
        Self {
            cache,
            encoder,
            config,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Find the `top_k` records most similar to `query`.
    ///
    /// When `min_score` is positive, only records whose score field is at
    /// least `min_score` are returned; a missing field counts as zero.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f64) -> Result<SearchResponse> {
        let started = Instant::now();

        let state = match self.cache.load(false).await {
            Ok(state) => state,
            Err(EmbeddingError::StoreUnavailable(reason)) => {
                warn!("Search skipped, vector store unavailable: {reason}");
                return Ok(SearchResponse::empty(
                    query,
                    SearchStatus::Unavailable { reason },
                    started,
                ));
            }
            Err(err) => return Err(err.into()),
        };

        let stale = state.is_stale();
        let snapshot = match state {
            CacheState::Ready(snapshot) | CacheState::Stale { snapshot, .. } => snapshot,
            CacheState::NoData => {
                return Ok(SearchResponse::empty(query, SearchStatus::NoCorpus, started));
            }
        };

        let mut response = SearchResponse {
            index_size: snapshot.len(),
            stale,
            ..SearchResponse::empty(query, SearchStatus::Ok, started)
        };
        if top_k == 0 {
            return Ok(response);
        }

        let mut vector = self.encoder.encode(query).await?;
        if !normalize(&mut vector) {
            debug!("Query encoded to a zero vector; nothing matches");
            response.search_time_ms = elapsed_ms(started);
            return Ok(response);
        }

        let ranked = snapshot.rank(&vector)?;
        let window = top_k.saturating_mul(self.config.oversample.max(1));

        for (position, (row, similarity)) in ranked.into_iter().enumerate() {
            if response.results.len() == top_k {
                break;
            }
            if position == window {
                debug!(
                    "Score filter kept {} of the first {window} candidates, widening",
                    response.results.len()
                );
            }

            let id = &snapshot.ids()[row];
            let metadata = snapshot.metadata(id).cloned().unwrap_or_default();
            if min_score > 0.0 && self.score(&metadata) < min_score {
                continue;
            }

            response.results.push(SearchHit {
                id: id.clone(),
                similarity: round_to(similarity, self.config.decimals),
                metadata,
            });
        }

        response.total = response.results.len();
        response.search_time_ms = elapsed_ms(started);
        debug!(
            "Search for {query:?} returned {} of {} rows in {}ms",
            response.total, response.index_size, response.search_time_ms
        );
        Ok(response)
    }

    fn score(&self, metadata: &Metadata) -> f64 {
        metadata
            .get(&self.config.score_field)
            .and_then(MetadataValue::as_f64)
            .unwrap_or(0.0)
    }
}
