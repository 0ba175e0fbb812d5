//! The lens service.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use lens_embeddings::{
    EmbeddingEncoder, EmbeddingError, Graph, OpenAIEncoder, SimilarityGraphBuilder, VectorCache, VectorCacheStats,
    VectorStore,
};
use lens_gateway::{
    ChatRequest, ChatResponse, GenerativeGateway, GenerativeProvider, OpenAIChatProvider,
    ResponseCache, ResponseCacheStats, SystemClock, UsageSink,
};

use crate::config::LensConfig;
use crate::error::{LensError, Result};
use crate::search::{RetrievalEngine, SearchResponse};

/// Similarity search, cached generation and graph builds behind one handle.
///
/// The service owns its caches. Build it with [`LensService::builder`], share
/// it behind an `Arc`, and call [`LensService::close`] on shutdown to flush
/// the response cache.
pub struct LensService {
    /// Configuration.
    config: LensConfig,

    /// Record source for the cache and graph builds.
    store: Arc<dyn VectorStore>,

    /// Cached embedding matrix.
    vector_cache: Arc<VectorCache>,

    /// Query ranking.
    retrieval: RetrievalEngine,

    /// Cached, rate-limited generation.
    gateway: GenerativeGateway,

    /// Graph builder.
    graph_builder: SimilarityGraphBuilder,

    /// Most recently built graph.
    graph: RwLock<Option<Arc<Graph>>>,

    /// Set by `close`.
    closed: AtomicBool,
}

impl LensService {
    /// Create a new service builder.
    pub fn builder() -> LensServiceBuilder {
        LensServiceBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &LensConfig {
        &self.config
    }

    /// Get the generative gateway.
    pub fn gateway(&self) -> &GenerativeGateway {
        &self.gateway
    }

    /// Find the `top_k` records most similar to `query`.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f64) -> Result<SearchResponse> {
        self.ensure_open()?;
        self.retrieval.search(query, top_k, min_score).await
    }

    /// Run a chat request through the gateway.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        self.ensure_open()?;
        Ok(self.gateway.chat(request).await?)
    }

    /// Build a similarity graph over every record in the store and publish it.
    ///
    /// Uses the configured threshold when `threshold` is `None`.
    pub async fn build_graph(&self, threshold: Option<f64>) -> Result<Arc<Graph>> {
        self.ensure_open()?;
        let threshold = threshold.unwrap_or(self.config.graph.threshold);

        let fetch = self.store.list_embeddings(&self.config.vector_cache.filter);
        let records = match self.config.vector_cache.load_timeout() {
            Some(deadline) => tokio::time::timeout(deadline, fetch).await.map_err(|_| {
                EmbeddingError::StoreUnavailable(format!(
                    "fetch timed out after {}s",
                    deadline.as_secs()
                ))
            })??,
            None => fetch.await?,
        };
        debug!("Building graph over {} records", records.len());

        let builder = self.graph_builder.clone();
        let graph = tokio::task::spawn_blocking(move || builder.build(&records, threshold)).await?;
        let graph = Arc::new(graph);

        *self.graph.write().await = Some(Arc::clone(&graph));
        Ok(graph)
    }

    /// The most recently built graph.
    pub async fn latest_graph(&self) -> Option<Arc<Graph>> {
        self.graph.read().await.clone()
    }

    /// Force the next search to reload the vector cache.
    pub fn invalidate_vector_cache(&self) {
        self.vector_cache.invalidate();
    }

    /// Get service statistics.
    pub async fn stats(&self) -> ServiceStats {
        let graph = self.graph.read().await.as_ref().map(|g| GraphSummary {
            nodes: g.nodes.len(),
            edges: g.edges.len(),
            clusters: g.clusters.len(),
            threshold: g.threshold,
            generated_at: g.generated_at,
        });

        ServiceStats {
            vector_cache: self.vector_cache.stats().await,
            response_cache: self.gateway.cache().stats().await,
            available_tokens: self.gateway.limiter().available().await,
            graph,
        }
    }

    /// Flush the response cache and release the cached snapshot.
    ///
    /// Later calls fail with [`LensError::Closed`]. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.gateway.cache().save().await?;
        self.vector_cache.clear().await;
        self.graph.write().await.take();
        info!("Lens service closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(LensError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Builder for [`LensService`].
pub struct LensServiceBuilder {
    config: LensConfig,
    store: Option<Arc<dyn VectorStore>>,
    encoder: Option<Arc<dyn EmbeddingEncoder>>,
    provider: Option<Arc<dyn GenerativeProvider>>,
    response_cache: Option<Arc<ResponseCache>>,
    usage_sink: Option<Arc<dyn UsageSink>>,
}

impl LensServiceBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: LensConfig::default(),
            store: None,
            encoder: None,
            provider: None,
            response_cache: None,
            usage_sink: None,
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: LensConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the vector store. Required.
    pub fn with_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the query encoder. Defaults to [`OpenAIEncoder`].
    pub fn with_encoder(mut self, encoder: Arc<dyn EmbeddingEncoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Set the generative provider. Defaults to [`OpenAIChatProvider`].
    pub fn with_provider(mut self, provider: Arc<dyn GenerativeProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Use an existing response cache instead of the configured one.
    pub fn with_response_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.response_cache = Some(cache);
        self
    }

    /// Set the usage sink. Defaults to logging usage.
    pub fn with_usage_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.usage_sink = Some(sink);
        self
    }

    /// Check the collaborators and build the service.
    ///
    /// Fails if the encoder or provider is not configured or the encoder's
    /// dimension differs from the cache's. An unreachable vector store only
    /// logs a warning; searches report it until the store comes back.
    pub async fn build(self) -> Result<LensService> {
        let config = self.config;
        config.validate()?;

        let store = self
            .store
            .ok_or_else(|| LensError::Config("a vector store is required".to_string()))?;

        let encoder = self.encoder.unwrap_or_else(|| {
            Arc::new(OpenAIEncoder::new().with_dimension(config.vector_cache.dimension))
        });
        if !encoder.is_available() {
            return Err(LensError::NotReady(format!(
                "embedding encoder {} is not configured",
                encoder.name()
            )));
        }
        if encoder.dimension() != config.vector_cache.dimension {
            return Err(LensError::Config(format!(
                "encoder {} produces {}-dimensional vectors but the cache expects {}",
                encoder.name(),
                encoder.dimension(),
                config.vector_cache.dimension
            )));
        }

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(OpenAIChatProvider::new()));
        if !provider.is_available() {
            return Err(LensError::NotReady(format!(
                "generative provider {} is not configured",
                provider.name()
            )));
        }

        let response_cache = match (self.response_cache, &config.response_cache_path) {
            (Some(cache), _) => cache,
            (None, Some(path)) => {
                Arc::new(ResponseCache::with_persistence(path, Arc::new(SystemClock)).await?)
            }
            (None, None) => Arc::new(ResponseCache::in_memory()),
        };

        let mut gateway = GenerativeGateway::new(provider, response_cache, config.gateway.clone())?;
        if let Some(sink) = self.usage_sink {
            gateway = gateway.with_usage_sink(sink);
        }

        let vector_cache = Arc::new(VectorCache::new(
            Arc::clone(&store),
            config.vector_cache.clone(),
        ));
        match vector_cache.load(false).await {
            Ok(state) => info!(
                "Vector cache warmed with {} rows",
                state.snapshot().map_or(0, |s| s.len())
            ),
            Err(err) => warn!("Vector store not reachable at startup: {err}"),
        }

        let retrieval = RetrievalEngine::new(
            Arc::clone(&vector_cache),
            encoder,
            config.search.clone(),
        );
        let graph_builder = SimilarityGraphBuilder::new(config.graph.clone());

        info!("Lens service ready");
        Ok(LensService {
            config,
            store,
            vector_cache,
            retrieval,
            gateway,
            graph_builder,
            graph: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }
}

impl Default for LensServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of the published graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    /// Number of nodes.
    pub nodes: usize,

    /// Number of edges.
    pub edges: usize,

    /// Number of clusters.
    pub clusters: usize,

    /// Threshold the graph was built with.
    pub threshold: f64,

    /// When the graph was built.
    pub generated_at: DateTime<Utc>,
}

/// Statistics about the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Vector cache statistics.
    pub vector_cache: VectorCacheStats,

    /// Response cache statistics.
    pub response_cache: ResponseCacheStats,

    /// Tokens currently in the rate limiter.
    pub available_tokens: f64,

    /// The published graph, if any.
    pub graph: Option<GraphSummary>,
}
