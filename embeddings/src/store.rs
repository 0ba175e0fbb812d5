//! Vector store collaborators.
//!
//! The vector cache only needs to list records. Two stores ship with the
//! crate: an in-memory one for embedding hosts and tests, and a JSON file
//! store used by the command line tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::record::{EmbeddingRecord, RecordFilter};

/// Source of embedding records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// List every record matching the filter.
    async fn list_embeddings(&self, filter: &RecordFilter) -> Result<Vec<EmbeddingRecord>>;
}

/// A vector store held entirely in memory.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<EmbeddingRecord>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding the given records.
    pub fn with_records(records: Vec<EmbeddingRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Insert or replace a record by id.
    pub async fn upsert(&self, record: EmbeddingRecord) {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    /// Remove a record by id.
    pub async fn remove(&self, id: &str) -> Option<EmbeddingRecord> {
        let mut records = self.records.write().await;
        let position = records.iter().position(|r| r.id == id)?;
        Some(records.remove(position))
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn list_embeddings(&self, filter: &RecordFilter) -> Result<Vec<EmbeddingRecord>> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }
}

/// A vector store backed by a JSON array of records on disk.
///
/// The file is re-read on every listing so external writers are picked up on
/// the next cache refresh.
pub struct JsonFileVectorStore {
    path: PathBuf,
}

impl JsonFileVectorStore {
    /// Open a store at the given path. The file does not need to exist yet.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with the given records.
    pub async fn save(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string(records)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, &self.path).await?;

        debug!("Saved {} records to {}", records.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for JsonFileVectorStore {
    async fn list_embeddings(&self, filter: &RecordFilter) -> Result<Vec<EmbeddingRecord>> {
        let content = fs::read_to_string(&self.path).await?;
        let records: Vec<EmbeddingRecord> = serde_json::from_str(&content)?;

        debug!("Read {} records from {}", records.len(), self.path.display());
        Ok(records.into_iter().filter(|r| filter.matches(r)).collect())
    }
}
