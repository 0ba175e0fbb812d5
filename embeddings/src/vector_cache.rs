//! In-memory vector cache.
//!
//! The cache holds one immutable [`Snapshot`] of every record in the vector
//! store, with each row L2-normalized at load time so that a similarity query
//! is a plain dot product. Snapshots are never mutated; a refresh builds a new
//! one and swaps the `Arc`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, Result};
use crate::record::{EmbeddingRecord, Metadata, RecordFilter};
use crate::similarity::{dot, normalize};
use crate::store::VectorStore;

/// Configuration for the vector cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorCacheConfig {
    /// Embedding dimension every cached row must have.
    pub dimension: usize,

    /// Snapshot lifetime in seconds. Zero reloads on every access.
    pub ttl_secs: u64,

    /// Deadline for a single store fetch, in seconds.
    pub load_timeout_secs: Option<u64>,

    /// Which records to load.
    pub filter: RecordFilter,
}

impl Default for VectorCacheConfig {
    fn default() -> Self {
        Self {
            dimension: crate::DEFAULT_DIMENSION,
            ttl_secs: 600,
            load_timeout_secs: Some(30),
            filter: RecordFilter::all(),
        }
    }
}

impl VectorCacheConfig {
    /// Set the dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the TTL in seconds.
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Set the store fetch deadline.
    pub fn with_load_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.load_timeout_secs = timeout.map(|t| t.as_secs());
        self
    }

    /// Set the record filter.
    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Snapshot lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Store fetch deadline.
    pub fn load_timeout(&self) -> Option<Duration> {
        self.load_timeout_secs.map(Duration::from_secs)
    }
}

/// An immutable, row-normalized view of the vector store.
#[derive(Debug)]
pub struct Snapshot {
    ids: Vec<String>,
    /// Row-major `ids.len() x dimension`.
    matrix: Vec<f32>,
    zero_rows: Vec<bool>,
    metadata: HashMap<String, Metadata>,
    dimension: usize,
    loaded_at: Instant,
    loaded_at_utc: DateTime<Utc>,
    ttl: Duration,
    skipped: usize,
}

impl Snapshot {
    /// Build a snapshot from raw records.
    ///
    /// Records whose dimension differs from `dimension` and repeated ids are
    /// skipped with a warning rather than failing the whole load.
    pub fn build(records: Vec<EmbeddingRecord>, dimension: usize, ttl: Duration) -> Self {
        let mut ids = Vec::with_capacity(records.len());
        let mut matrix = Vec::with_capacity(records.len() * dimension);
        let mut zero_rows = Vec::with_capacity(records.len());
        let mut metadata = HashMap::with_capacity(records.len());
        let mut skipped = 0;

        for record in records {
            if dimension == 0 || record.vector.len() != dimension {
                let err = EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                };
                warn!("Skipping record {}: {err}", record.id);
                skipped += 1;
                continue;
            }
            if metadata.contains_key(&record.id) {
                warn!("Skipping duplicate record {}", record.id);
                skipped += 1;
                continue;
            }

            let mut row = record.vector;
            let nonzero = normalize(&mut row);
            matrix.extend_from_slice(&row);
            zero_rows.push(!nonzero);
            metadata.insert(record.id.clone(), record.metadata);
            ids.push(record.id);
        }

        Self {
            ids,
            matrix,
            zero_rows,
            metadata,
            dimension,
            loaded_at: Instant::now(),
            loaded_at_utc: Utc::now(),
            ttl,
            skipped,
        }
    }

    /// Number of cached rows.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Check if the snapshot holds no rows.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Record ids, in row order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The normalized vector at a row.
    pub fn row(&self, index: usize) -> &[f32] {
        let start = index * self.dimension;
        &self.matrix[start..start + self.dimension]
    }

    /// Whether the row had zero norm at load time.
    pub fn is_zero_row(&self, index: usize) -> bool {
        self.zero_rows[index]
    }

    /// Metadata of a record.
    pub fn metadata(&self, id: &str) -> Option<&Metadata> {
        self.metadata.get(id)
    }

    /// Number of records rejected during the build.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Wall-clock time of the load.
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at_utc
    }

    /// Time since the load.
    pub fn age(&self) -> Duration {
        self.loaded_at.elapsed()
    }

    /// Whether the snapshot has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }

    /// Compute `matrix · query` for an already normalized query.
    pub fn similarities(&self, query: &[f32]) -> Result<Vec<f64>> {
        if query.len() != self.dimension {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        (0..self.len()).map(|i| dot(self.row(i), query)).collect()
    }

    /// Rows ranked by similarity to a normalized query, best first.
    ///
    /// Zero rows are left out. Equal similarities are ordered by id.
    pub fn rank(&self, query: &[f32]) -> Result<Vec<(usize, f64)>> {
        let similarities = self.similarities(query)?;
        let mut ranked: Vec<(usize, f64)> = similarities
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !self.zero_rows[*i])
            .collect();

        ranked.sort_by(|a, b| {
            OrderedFloat(b.1)
                .cmp(&OrderedFloat(a.1))
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        });
        Ok(ranked)
    }
}

/// Outcome of a cache load.
#[derive(Debug, Clone)]
pub enum CacheState {
    /// A current snapshot.
    Ready(Arc<Snapshot>),

    /// The refresh failed; the previous snapshot is served as-is.
    Stale { snapshot: Arc<Snapshot>, error: String },

    /// The corpus is empty.
    NoData,
}

impl CacheState {
    fn from_snapshot(snapshot: Arc<Snapshot>) -> Self {
        if snapshot.is_empty() {
            Self::NoData
        } else {
            Self::Ready(snapshot)
        }
    }

    /// The snapshot to search, if any.
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Self::Ready(snapshot) | Self::Stale { snapshot, .. } => Some(snapshot),
            Self::NoData => None,
        }
    }

    /// Whether this state is a stale fallback.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Statistics about the vector cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorCacheStats {
    /// Whether a snapshot is loaded.
    pub loaded: bool,

    /// Number of cached rows.
    pub size: usize,

    /// Age of the snapshot in seconds.
    pub age_secs: Option<f64>,

    /// Configured TTL in seconds.
    pub ttl_secs: u64,

    /// Records rejected by the last load.
    pub skipped: usize,

    /// Completed reloads since construction.
    pub reloads: u64,
}

/// Cache of the full embedding matrix, refreshed lazily on TTL expiry.
pub struct VectorCache {
    /// Record source.
    store: Arc<dyn VectorStore>,

    /// Configuration.
    config: VectorCacheConfig,

    /// Published snapshot.
    current: RwLock<Option<Arc<Snapshot>>>,

    /// Serializes reloads so concurrent misses share one fetch.
    reload_lock: Mutex<()>,

    /// Bumped by every `invalidate`.
    invalidation_epoch: AtomicU64,

    /// Invalidation epoch observed before the fetch that built the published
    /// snapshot. The snapshot is only valid while this matches.
    loaded_epoch: AtomicU64,

    /// Incremented after every successful reload.
    generation: AtomicU64,
}

impl VectorCache {
    /// Create an empty cache over a store. Nothing is fetched until `load`.
    pub fn new(store: Arc<dyn VectorStore>, config: VectorCacheConfig) -> Self {
        Self {
            store,
            config,
            current: RwLock::new(None),
            reload_lock: Mutex::new(()),
            invalidation_epoch: AtomicU64::new(0),
            loaded_epoch: AtomicU64::new(0),
            generation: AtomicU64::new(0),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &VectorCacheConfig {
        &self.config
    }

    /// Return a usable snapshot, reloading from the store when needed.
    ///
    /// Callers that arrive while a reload is running wait for it and reuse its
    /// result instead of fetching again.
    pub async fn load(&self, force: bool) -> Result<CacheState> {
        let seen = self.generation.load(Ordering::Acquire);
        if !force && let Some(snapshot) = self.valid_snapshot().await {
            return Ok(CacheState::from_snapshot(snapshot));
        }

        let _guard = self.reload_lock.lock().await;

        if !force
            && self.generation.load(Ordering::Acquire) != seen
            && let Some(snapshot) = self.valid_snapshot().await
        {
            debug!("Reusing snapshot loaded by a concurrent caller");
            return Ok(CacheState::from_snapshot(snapshot));
        }

        self.reload().await
    }

    /// Force the next `load` to refetch regardless of TTL.
    pub fn invalidate(&self) {
        self.invalidation_epoch.fetch_add(1, Ordering::AcqRel);
        info!("Vector cache invalidated");
    }

    /// The published snapshot without any I/O.
    pub async fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.read().await.clone()
    }

    /// Drop the published snapshot.
    pub async fn clear(&self) {
        self.current.write().await.take();
        info!("Cleared vector cache");
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> VectorCacheStats {
        let current = self.current.read().await;
        VectorCacheStats {
            loaded: current.is_some(),
            size: current.as_ref().map_or(0, |s| s.len()),
            age_secs: current.as_ref().map(|s| s.age().as_secs_f64()),
            ttl_secs: self.config.ttl_secs,
            skipped: current.as_ref().map_or(0, |s| s.skipped()),
            reloads: self.generation.load(Ordering::Acquire),
        }
    }

    async fn valid_snapshot(&self) -> Option<Arc<Snapshot>> {
        if self.loaded_epoch.load(Ordering::Acquire)
            != self.invalidation_epoch.load(Ordering::Acquire)
        {
            return None;
        }
        self.current
            .read()
            .await
            .as_ref()
            .filter(|s| !s.is_expired())
            .cloned()
    }

    async fn reload(&self) -> Result<CacheState> {
        debug!("Reloading vector cache from store");
        // An invalidation that lands during the fetch must survive it.
        let epoch = self.invalidation_epoch.load(Ordering::Acquire);

        let fetch = self.store.list_embeddings(&self.config.filter);
        let fetched = match self.config.load_timeout() {
            Some(deadline) => match tokio::time::timeout(deadline, fetch).await {
                Ok(result) => result,
                Err(_) => Err(EmbeddingError::StoreUnavailable(format!(
                    "fetch timed out after {}s",
                    deadline.as_secs()
                ))),
            },
            None => fetch.await,
        };

        match fetched {
            Ok(records) => {
                let fetched_count = records.len();
                let snapshot = Arc::new(Snapshot::build(
                    records,
                    self.config.dimension,
                    self.config.ttl(),
                ));

                *self.current.write().await = Some(Arc::clone(&snapshot));
                self.loaded_epoch.store(epoch, Ordering::Release);
                self.generation.fetch_add(1, Ordering::AcqRel);

                info!(
                    "Vector cache loaded: {} rows ({} fetched, {} skipped)",
                    snapshot.len(),
                    fetched_count,
                    snapshot.skipped()
                );
                Ok(CacheState::from_snapshot(snapshot))
            }
            Err(err) => {
                let previous = self.current.read().await.clone();
                match previous {
                    Some(snapshot) => {
                        warn!(
                            "Vector store refresh failed, serving snapshot from {}: {err}",
                            snapshot.loaded_at()
                        );
                        if snapshot.is_empty() {
                            Ok(CacheState::NoData)
                        } else {
                            Ok(CacheState::Stale {
                                snapshot,
                                error: err.to_string(),
                            })
                        }
                    }
                    None => Err(match err {
                        unavailable @ EmbeddingError::StoreUnavailable(_) => unavailable,
                        other => EmbeddingError::StoreUnavailable(other.to_string()),
                    }),
                }
            }
        }
    }
}
