//! Content-addressed response cache.
//!
//! Keys are derived from the request content, so identical requests always
//! land on the same entry. Entries expire lazily: `get` ignores anything
//! older than its own TTL and `sweep` reclaims the space when asked. There is
//! no size-based eviction.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{GatewayError, Result};

/// Fingerprint of a generative request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a `(model, temperature, compressed prompt)` triple.
    pub fn for_request(model: &str, temperature: f32, prompt: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{model}:{temperature}:{prompt}").as_bytes());
        Self(format!("llm_cache:{:x}", hasher.finalize()))
    }

    /// The key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The request fingerprint.
    pub key: String,

    /// The provider's response text.
    pub value: String,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,

    /// Lifetime of this entry in milliseconds.
    pub ttl_ms: u64,
}

impl CacheEntry {
    /// Whether the entry has outlived its TTL at `now`.
    ///
    /// A TTL too large to represent never expires.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let expires_at = i64::try_from(self.ttl_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        match expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Milliseconds in `ttl`, rounded up so a non-zero TTL never becomes zero.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Statistics about the response cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCacheStats {
    /// Entries held, including expired ones not yet swept.
    pub entries: usize,

    /// Entries past their TTL.
    pub expired: usize,

    /// Backing file, if persistent.
    pub path: Option<PathBuf>,
}

/// Persistent cache of generative responses.
pub struct ResponseCache {
    /// In-memory entries.
    entries: RwLock<HashMap<String, CacheEntry>>,

    /// Path for persistent storage.
    cache_path: Option<PathBuf>,

    /// Time source for entry ages.
    clock: Arc<dyn Clock>,

    /// Serializes writes of the backing file.
    save_lock: Mutex<()>,
}

impl ResponseCache {
    /// Create an in-memory cache.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cache_path: None,
            clock,
            save_lock: Mutex::new(()),
        }
    }

    /// Create an in-memory cache on the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Create a cache persisted to a JSON file, loading any live entries.
    pub async fn with_persistence(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut cache = Self::new(clock);
        cache.cache_path = Some(path.clone());

        if fs::try_exists(&path).await? {
            cache.load().await?;
        }

        Ok(cache)
    }

    /// Look up a live entry.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        entries
            .get(key.as_str())
            .filter(|e| !e.is_expired(now))
            .map(|e| e.value.clone())
    }

    /// Insert or replace an entry, resetting its age.
    ///
    /// The in-memory entry is visible as soon as this is called; an error
    /// means only that persisting it failed.
    pub async fn put(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            value,
            created_at: self.clock.now(),
            ttl_ms: ttl_millis(ttl),
        };

        self.entries
            .write()
            .await
            .insert(key.as_str().to_string(), entry);
        debug!("Cached response for {key}");

        self.save().await
    }

    /// Remove an entry.
    pub async fn remove(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.entries.write().await.remove(key.as_str()).is_some();
        if removed {
            self.save().await?;
        }
        Ok(removed)
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn sweep(&self) -> Result<usize> {
        let now = self.clock.now();
        let removed = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired(now));
            before - entries.len()
        };

        if removed > 0 {
            info!("Swept {removed} expired responses");
            self.save().await?;
        }
        Ok(removed)
    }

    /// Clear the entire cache.
    pub async fn clear(&self) -> Result<()> {
        self.entries.write().await.clear();
        info!("Cleared response cache");
        self.save().await
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> ResponseCacheStats {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        ResponseCacheStats {
            entries: entries.len(),
            expired: entries.values().filter(|e| e.is_expired(now)).count(),
            path: self.cache_path.clone(),
        }
    }

    /// Save the cache to disk. A no-op for in-memory caches.
    ///
    /// The file is written to a temporary sibling and renamed into place, so
    /// readers see either the old or the new contents.
    pub async fn save(&self) -> Result<()> {
        let Some(ref path) = self.cache_path else {
            return Ok(());
        };

        let _guard = self.save_lock.lock().await;
        let content = {
            let entries = self.entries.read().await;
            let entries: Vec<&CacheEntry> = entries.values().collect();
            serde_json::to_string(&entries)?
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| GatewayError::Cache(format!("{}: {e}", path.display())))?;

        debug!("Saved response cache to {}", path.display());
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        let Some(ref path) = self.cache_path else {
            return Ok(());
        };

        let content = fs::read_to_string(path).await?;
        let loaded: Vec<CacheEntry> = match serde_json::from_str(&content) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Ignoring unreadable response cache {}: {e}", path.display());
                return Ok(());
            }
        };

        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        for entry in loaded.into_iter().filter(|e| !e.is_expired(now)) {
            entries.insert(entry.key.clone(), entry);
        }

        info!("Loaded {} cached responses from disk", entries.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn test_key_is_stable_and_content_addressed() {
        let a = CacheKey::for_request("deepseek-chat", 0.7, "hello");
        let b = CacheKey::for_request("deepseek-chat", 0.7, "hello");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("llm_cache:"));
        assert_eq!(a.as_str().len(), "llm_cache:".len() + 64);

        assert_ne!(a, CacheKey::for_request("deepseek-chat", 0.2, "hello"));
        assert_ne!(a, CacheKey::for_request("deepseek-reasoner", 0.7, "hello"));
        assert_ne!(a, CacheKey::for_request("deepseek-chat", 0.7, "hello!"));
    }

    #[tokio::test]
    async fn test_put_then_get_until_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::new(clock.clone());
        let key = CacheKey::for_request("m", 0.7, "p");

        cache.put(&key, "answer".to_string(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get(&key).await, Some("answer".to_string()));

        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&key).await, Some("answer".to_string()));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_sub_second_ttl() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::new(clock.clone());
        let key = CacheKey::for_request("m", 0.7, "p");

        cache.put(&key, "v".to_string(), Duration::from_millis(500)).await.unwrap();
        assert_eq!(cache.get(&key).await, Some("v".to_string()));

        clock.advance(Duration::from_millis(499));
        assert_eq!(cache.get(&key).await, Some("v".to_string()));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get(&key).await, None);
    }

    #[tokio::test]
    async fn test_unbounded_ttl_never_expires() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::new(clock.clone());
        let forever = CacheKey::for_request("m", 0.7, "forever");
        let max = CacheKey::for_request("m", 0.7, "max");

        cache.put(&forever, "v".to_string(), Duration::from_secs(u64::MAX)).await.unwrap();
        cache.put(&max, "v".to_string(), Duration::MAX).await.unwrap();
        clock.advance(DAY * 365 * 100);

        assert_eq!(cache.get(&forever).await, Some("v".to_string()));
        assert_eq!(cache.get(&max).await, Some("v".to_string()));
        assert_eq!(cache.stats().await.expired, 0);
    }

    #[tokio::test]
    async fn test_put_is_upsert_and_resets_age() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::new(clock.clone());
        let key = CacheKey::for_request("m", 0.7, "p");

        cache.put(&key, "old".to_string(), Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(50));
        cache.put(&key, "new".to_string(), Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(50));

        assert_eq!(cache.get(&key).await, Some("new".to_string()));
        assert_eq!(cache.stats().await.entries, 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::new(clock.clone());
        let short = CacheKey::for_request("m", 0.0, "short");
        let long = CacheKey::for_request("m", 0.0, "long");

        cache.put(&short, "s".to_string(), Duration::from_secs(10)).await.unwrap();
        cache.put(&long, "l".to_string(), DAY).await.unwrap();
        clock.advance(Duration::from_secs(11));

        assert_eq!(cache.stats().await.expired, 1);
        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert_eq!(cache.stats().await.entries, 1);
        assert_eq!(cache.get(&long).await, Some("l".to_string()));
    }

    #[tokio::test]
    async fn test_persistence_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache/responses.json");
        let clock = Arc::new(ManualClock::default());
        let live = CacheKey::for_request("m", 0.7, "live");
        let dead = CacheKey::for_request("m", 0.7, "dead");

        {
            let cache = ResponseCache::with_persistence(&path, clock.clone()).await.unwrap();
            cache.put(&live, "kept".to_string(), DAY).await.unwrap();
            cache.put(&dead, "gone".to_string(), Duration::from_secs(5)).await.unwrap();
        }
        clock.advance(Duration::from_secs(10));

        let reopened = ResponseCache::with_persistence(&path, clock).await.unwrap();
        assert_eq!(reopened.get(&live).await, Some("kept".to_string()));
        assert_eq!(reopened.get(&dead).await, None);
        assert_eq!(reopened.stats().await.entries, 1);
    }
}
