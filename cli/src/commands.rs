//! Subcommand implementations. Each returns the text to print, if any.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing::info;

use lens_embeddings::{JsonFileVectorStore, SimilarityGraphBuilder, VectorCache, VectorStore};
use lens_gateway::{ChatRequest, ResponseCache, SystemClock};
use lens_retrieval::{LensConfig, LensService};

/// Read the config file, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<LensConfig> {
    let mut config = match path {
        Some(path) => LensConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => LensConfig::default(),
    };
    if config.response_cache_path.is_none() {
        config.response_cache_path = Some(LensConfig::default_response_cache_path());
    }
    Ok(config)
}

async fn service(config: LensConfig, store: &Path) -> anyhow::Result<LensService> {
    LensService::builder()
        .with_config(config)
        .with_store(Arc::new(JsonFileVectorStore::new(store)))
        .build()
        .await
        .context("starting lens service")
}

pub async fn search(
    config: LensConfig,
    store: &Path,
    query: &str,
    top_k: Option<usize>,
    min_score: f64,
) -> anyhow::Result<Option<String>> {
    let top_k = top_k.unwrap_or(config.search.default_top_k);
    let service = service(config, store).await?;

    let response = service.search(query, top_k, min_score).await?;
    service.close().await?;
    Ok(Some(serde_json::to_string_pretty(&response)?))
}

pub async fn chat(
    config: LensConfig,
    store: &Path,
    request: ChatRequest,
) -> anyhow::Result<Option<String>> {
    let service = service(config, store).await?;

    let response = service.chat(request).await?;
    service.close().await?;
    Ok(Some(serde_json::to_string_pretty(&json!({
        "text": response.text,
        "cached": response.cached,
        "cache_key": response.cache_key.as_str(),
        "usage": response.usage,
    }))?))
}

/// Build the graph straight from the store. Needs no API keys.
pub async fn graph(
    config: LensConfig,
    store: &Path,
    threshold: Option<f64>,
    output: Option<&Path>,
) -> anyhow::Result<Option<String>> {
    let store = JsonFileVectorStore::new(store);
    let records = store
        .list_embeddings(&config.vector_cache.filter)
        .await
        .with_context(|| format!("reading records from {}", store.path().display()))?;

    let threshold = threshold.unwrap_or(config.graph.threshold);
    let builder = SimilarityGraphBuilder::new(config.graph);
    let graph = tokio::task::spawn_blocking(move || builder.build(&records, threshold)).await?;
    let content = serde_json::to_string_pretty(&graph)?;

    match output {
        Some(path) => {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("writing graph to {}", path.display()))?;
            info!(
                "Wrote graph with {} nodes and {} edges to {}",
                graph.nodes.len(),
                graph.edges.len(),
                path.display()
            );
            Ok(None)
        }
        None => Ok(Some(content)),
    }
}

/// Report cache statistics. Needs no API keys.
pub async fn stats(config: LensConfig, store: &Path) -> anyhow::Result<Option<String>> {
    let store: Arc<dyn VectorStore> = Arc::new(JsonFileVectorStore::new(store));
    let vector_cache = VectorCache::new(store, config.vector_cache);
    if let Err(err) = vector_cache.load(false).await {
        info!("Vector store not readable: {err}");
    }

    let response_cache = match &config.response_cache_path {
        Some(path) => ResponseCache::with_persistence(path, Arc::new(SystemClock)).await?,
        None => ResponseCache::in_memory(),
    };

    Ok(Some(serde_json::to_string_pretty(&json!({
        "vector_cache": vector_cache.stats().await,
        "response_cache": response_cache.stats().await,
    }))?))
}
