//! Usage accounting for provider calls.
//!
//! Sinks are best-effort: the gateway logs and ignores their errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::provider::TokenUsage;

/// One provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Characters in the compressed prompt.
    pub prompt_chars: usize,
    /// Characters in the response.
    pub response_chars: usize,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Build a record for a finished call.
    pub fn new(model: &str, usage: TokenUsage, prompt: &str, response: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total(),
            prompt_chars: prompt.chars().count(),
            response_chars: response.chars().count(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for usage records.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record one call.
    async fn record(&self, record: &UsageRecord) -> anyhow::Result<()>;
}

/// Writes usage to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        info!(
            model = %record.model,
            prompt_tokens = record.prompt_tokens,
            completion_tokens = record.completion_tokens,
            prompt_chars = record.prompt_chars,
            response_chars = record.response_chars,
            "Token usage: {}",
            record.total_tokens
        );
        Ok(())
    }
}

/// Per-model totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Aggregate usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

impl UsageSummary {
    /// Prompt plus completion tokens.
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    fn add(&mut self, record: &UsageRecord) {
        self.calls += 1;
        self.prompt_tokens += record.prompt_tokens;
        self.completion_tokens += record.completion_tokens;

        let model = self.by_model.entry(record.model.clone()).or_default();
        model.calls += 1;
        model.prompt_tokens += record.prompt_tokens;
        model.completion_tokens += record.completion_tokens;
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct InMemoryUsageLog {
    records: Mutex<Vec<UsageRecord>>,
}

impl InMemoryUsageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded calls.
    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().await.clone()
    }

    /// Totals over all recorded calls.
    pub async fn summary(&self) -> UsageSummary {
        let records = self.records.lock().await;
        let mut summary = UsageSummary::default();
        for record in records.iter() {
            summary.add(record);
        }
        summary
    }
}

#[async_trait]
impl UsageSink for InMemoryUsageLog {
    async fn record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

/// Appends records as JSON lines to a file.
#[derive(Debug)]
pub struct JsonlUsageSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlUsageSink {
    /// Create a sink writing to `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl UsageSink for JsonlUsageSink {
    async fn record(&self, record: &UsageRecord) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening usage log {}", self.path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
