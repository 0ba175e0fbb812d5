//! Integration tests for the lens service.
//!
//! These drive the full service with in-process collaborators: a literal
//! encoder, an in-memory or failing store, and a counting provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use lens_embeddings::{
    Embedding, EmbeddingEncoder, EmbeddingError, GraphConfig, InMemoryVectorStore, RecordFilter,
    VectorCacheConfig,
};
use lens_gateway::{
    Completion, CompletionRequest, GatewayConfig, GenerativeProvider, InMemoryUsageLog,
    LimiterConfig, ProviderError, TokenUsage,
};
use lens_retrieval::{
    ChatRequest, EmbeddingRecord, LensConfig, LensError, LensService, SearchStatus, VectorStore,
};

/// Maps known query strings to fixed vectors.
struct TableEncoder {
    table: HashMap<&'static str, Embedding>,
}

impl TableEncoder {
    fn new() -> Self {
        Self {
            table: HashMap::from([
                ("east", vec![1.0, 0.0]),
                ("north", vec![0.0, 1.0]),
                ("nowhere", vec![0.0, 0.0]),
            ]),
        }
    }
}

#[async_trait]
impl EmbeddingEncoder for TableEncoder {
    fn name(&self) -> &str {
        "table"
    }

    fn dimension(&self) -> usize {
        2
    }

    async fn encode(&self, text: &str) -> lens_embeddings::Result<Embedding> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::InvalidResponse(format!("unknown query {text}")))
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Store whose availability can be toggled.
struct FlakyStore {
    inner: InMemoryVectorStore,
    down: AtomicBool,
    fetches: AtomicUsize,
}

impl FlakyStore {
    fn new(records: Vec<EmbeddingRecord>) -> Self {
        Self {
            inner: InMemoryVectorStore::with_records(records),
            down: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn list_embeddings(
        &self,
        filter: &RecordFilter,
    ) -> lens_embeddings::Result<Vec<EmbeddingRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(EmbeddingError::StoreUnavailable("connection refused".to_string()));
        }
        self.inner.list_embeddings(filter).await
    }
}

/// Store that never answers within any reasonable deadline.
struct StalledStore;

#[async_trait]
impl VectorStore for StalledStore {
    async fn list_embeddings(
        &self,
        _filter: &RecordFilter,
    ) -> lens_embeddings::Result<Vec<EmbeddingRecord>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(corpus())
    }
}

#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl GenerativeProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Completion {
            text: format!("reply {n} to {}", request.prompt),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 4,
            },
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn corpus() -> Vec<EmbeddingRecord> {
    vec![
        EmbeddingRecord::new("a", vec![1.0, 0.0])
            .with_metadata("engagement_score", 10.0)
            .with_metadata("primary_track", "food"),
        EmbeddingRecord::new("b", vec![0.0, 1.0])
            .with_metadata("engagement_score", 90.0)
            .with_metadata("primary_track", "travel"),
        EmbeddingRecord::new("c", vec![0.9, 0.1])
            .with_metadata("engagement_score", 50.0)
            .with_metadata("primary_track", "food"),
    ]
}

fn config() -> LensConfig {
    LensConfig::default().with_vector_cache(VectorCacheConfig::default().with_dimension(2))
}

async fn service_over(store: Arc<dyn VectorStore>, config: LensConfig) -> LensService {
    LensService::builder()
        .with_config(config)
        .with_store(store)
        .with_encoder(Arc::new(TableEncoder::new()))
        .with_provider(Arc::new(CountingProvider::default()))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_nearest_neighbours_in_order() {
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config()).await;

    let top2 = service.search("east", 2, 0.0).await.unwrap();
    let ids: Vec<&str> = top2.results.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(top2.status, SearchStatus::Ok);
    assert_eq!(top2.index_size, 3);
    assert_eq!(top2.results[0].similarity, 1.0);
    assert_eq!(top2.results[1].similarity, 0.9939);

    let all = service.search("east", 10, 0.0).await.unwrap();
    assert_eq!(all.results.last().map(|h| h.id.as_str()), Some("b"));
    assert!(
        all.results
            .windows(2)
            .all(|w| w[0].similarity >= w[1].similarity)
    );
}

#[tokio::test]
async fn test_search_is_idempotent_on_unchanged_cache() {
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config()).await;

    let first = service.search("north", 3, 0.0).await.unwrap();
    let second = service.search("north", 3, 0.0).await.unwrap();
    assert_eq!(first.results, second.results);
}

#[tokio::test]
async fn test_min_score_filters_by_engagement() {
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config()).await;

    let response = service.search("east", 2, 40.0).await.unwrap();
    let ids: Vec<&str> = response.results.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b"]);
}

#[tokio::test]
async fn test_zero_query_matches_nothing() {
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config()).await;

    let response = service.search("nowhere", 5, 0.0).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.status, SearchStatus::Ok);
}

#[tokio::test]
async fn test_empty_corpus_reports_no_corpus() {
    let service = service_over(Arc::new(InMemoryVectorStore::new()), config()).await;

    let response = service.search("east", 5, 0.0).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(response.status, SearchStatus::NoCorpus);
}

#[tokio::test]
async fn test_store_down_at_startup_reports_unavailable() {
    let store = Arc::new(FlakyStore::new(corpus()));
    store.down.store(true, Ordering::SeqCst);
    let service = service_over(store.clone(), config()).await;

    let response = service.search("east", 5, 0.0).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(
        response.status,
        SearchStatus::Unavailable {
            reason: "connection refused".to_string()
        }
    );

    store.down.store(false, Ordering::SeqCst);
    let response = service.search("east", 5, 0.0).await.unwrap();
    assert_eq!(response.total, 3);
}

#[tokio::test]
async fn test_store_down_after_load_serves_stale_snapshot() {
    let store = Arc::new(FlakyStore::new(corpus()));
    let service = service_over(store.clone(), config()).await;

    store.down.store(true, Ordering::SeqCst);
    service.invalidate_vector_cache();

    let response = service.search("east", 1, 0.0).await.unwrap();
    assert!(response.stale);
    assert_eq!(response.results[0].id, "a");
}

#[tokio::test]
async fn test_invalidate_picks_up_new_records() {
    let store = Arc::new(InMemoryVectorStore::with_records(corpus()));
    let service = service_over(store.clone(), config()).await;

    store.upsert(EmbeddingRecord::new("d", vec![1.0, 0.0001])).await;
    assert_eq!(service.search("east", 10, 0.0).await.unwrap().total, 3);

    service.invalidate_vector_cache();
    assert_eq!(service.search("east", 10, 0.0).await.unwrap().total, 4);
}

#[tokio::test]
async fn test_zero_ttl_fetches_on_every_search() {
    let store = Arc::new(FlakyStore::new(corpus()));
    let config = LensConfig::default().with_vector_cache(
        VectorCacheConfig::default()
            .with_dimension(2)
            .with_ttl_secs(0),
    );
    let service = service_over(store.clone(), config).await;

    for _ in 0..3 {
        service.search("east", 1, 0.0).await.unwrap();
    }
    // One warm-up load plus one per search.
    assert_eq!(store.fetches.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_chat_is_cached_and_logged() {
    let provider = Arc::new(CountingProvider::default());
    let usage = Arc::new(InMemoryUsageLog::new());
    let service = LensService::builder()
        .with_config(config())
        .with_store(Arc::new(InMemoryVectorStore::with_records(corpus())))
        .with_encoder(Arc::new(TableEncoder::new()))
        .with_provider(provider.clone())
        .with_usage_sink(usage.clone())
        .build()
        .await
        .unwrap();

    let first = service.chat(ChatRequest::new("summarize a")).await.unwrap();
    let second = service.chat(ChatRequest::new("summarize a")).await.unwrap();

    assert_eq!(first.text, "reply 0 to summarize a");
    assert_eq!(second.text, first.text);
    assert!(second.cached);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(usage.summary().await.calls, 1);
}

#[tokio::test]
async fn test_graph_is_built_and_published() {
    let config = config().with_graph(GraphConfig {
        threshold: 0.5,
        ..GraphConfig::default()
    });
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config).await;
    assert!(service.latest_graph().await.is_none());

    let graph = service.build_graph(None).await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(graph.edges.len(), 1);
    let edge = graph.edge("c", "a").unwrap();
    assert_eq!((edge.weight * 1000.0).round() / 1000.0, 0.994);
    assert_eq!(graph.clusters["food"], vec!["a", "c"]);

    let stricter = service.build_graph(Some(0.999)).await.unwrap();
    assert!(stricter.edges.is_empty());
    assert_eq!(
        service.latest_graph().await.map(|g| g.threshold),
        Some(0.999)
    );

    let stats = service.stats().await;
    assert_eq!(stats.graph.map(|g| g.edges), Some(0));
    assert_eq!(stats.vector_cache.size, 3);
}

#[tokio::test(start_paused = true)]
async fn test_graph_build_respects_store_deadline() {
    let config = config().with_vector_cache(
        VectorCacheConfig::default()
            .with_dimension(2)
            .with_load_timeout(Some(Duration::from_secs(5))),
    );
    let service = service_over(Arc::new(StalledStore), config).await;

    let err = service.build_graph(None).await.unwrap_err();
    assert!(matches!(
        err,
        LensError::Embedding(EmbeddingError::StoreUnavailable(_))
    ));
    assert!(service.latest_graph().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stats_do_not_wait_for_rate_limited_callers() {
    let config = config().with_gateway(GatewayConfig::default().with_limiter(LimiterConfig {
        capacity: 1,
        refill_per_sec: 0.0,
    }));
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config).await;
    let limiter = Arc::clone(service.gateway().limiter());
    limiter.acquire(1).await.unwrap();

    let waiter = tokio::spawn({
        let limiter = Arc::clone(&limiter);
        async move { limiter.acquire(1).await }
    });
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!waiter.is_finished());

    let stats = tokio::time::timeout(Duration::from_secs(3600), service.stats())
        .await
        .unwrap();
    assert_eq!(stats.available_tokens, 0.0);
    waiter.abort();
}

#[tokio::test]
async fn test_response_cache_survives_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = config().with_response_cache_path(dir.path().join("responses.json"));

    let first = service_over(
        Arc::new(InMemoryVectorStore::with_records(corpus())),
        config.clone(),
    )
    .await;
    first.chat(ChatRequest::new("hello")).await.unwrap();
    first.close().await.unwrap();

    let second = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config).await;
    let response = second.chat(ChatRequest::new("hello")).await.unwrap();
    assert!(response.cached);
    assert_eq!(response.text, "reply 0 to hello");
}

#[tokio::test]
async fn test_closed_service_rejects_calls() {
    let service = service_over(Arc::new(InMemoryVectorStore::with_records(corpus())), config()).await;
    service.close().await.unwrap();
    service.close().await.unwrap();

    assert!(matches!(
        service.search("east", 1, 0.0).await,
        Err(LensError::Closed)
    ));
    assert!(matches!(
        service.chat(ChatRequest::new("hi")).await,
        Err(LensError::Closed)
    ));
}

#[tokio::test]
async fn test_builder_checks_collaborators() {
    let err = LensService::builder()
        .with_config(config())
        .with_encoder(Arc::new(TableEncoder::new()))
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LensError::Config(_)));

    // Encoder produces 2-d vectors, cache expects the default 512.
    let err = LensService::builder()
        .with_store(Arc::new(InMemoryVectorStore::new()))
        .with_encoder(Arc::new(TableEncoder::new()))
        .with_provider(Arc::new(CountingProvider::default()))
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, LensError::Config(_)));
}
