//! Configuration for the lens service.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lens_embeddings::{GraphConfig, VectorCacheConfig};
use lens_gateway::GatewayConfig;

use crate::error::{LensError, Result};

/// Configuration for the lens service.
///
/// Every section has defaults, so a config file only needs the values it
/// changes:
///
/// ```toml
/// [vector_cache]
/// ttl_secs = 300
///
/// [gateway.limiter]
/// capacity = 20
/// refill_per_sec = 2.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig {
    /// Vector cache configuration.
    pub vector_cache: VectorCacheConfig,

    /// Search configuration.
    pub search: SearchConfig,

    /// Generative gateway configuration.
    pub gateway: GatewayConfig,

    /// Similarity graph configuration.
    pub graph: GraphConfig,

    /// Where the response cache is persisted. `None` keeps it in memory.
    pub response_cache_path: Option<PathBuf>,
}

impl LensConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Default location of the persisted response cache.
    pub fn default_response_cache_path() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_default()
            .join("lens/responses.json")
    }

    /// Set the vector cache configuration.
    pub fn with_vector_cache(mut self, config: VectorCacheConfig) -> Self {
        self.vector_cache = config;
        self
    }

    /// Set the search configuration.
    pub fn with_search(mut self, config: SearchConfig) -> Self {
        self.search = config;
        self
    }

    /// Set the gateway configuration.
    pub fn with_gateway(mut self, config: GatewayConfig) -> Self {
        self.gateway = config;
        self
    }

    /// Set the graph configuration.
    pub fn with_graph(mut self, config: GraphConfig) -> Self {
        self.graph = config;
        self
    }

    /// Persist the response cache at `path`.
    pub fn with_response_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.response_cache_path = Some(path.into());
        self
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.vector_cache.dimension == 0 {
            return Err(LensError::Config(
                "vector_cache.dimension must be positive".to_string(),
            ));
        }
        if self.search.oversample == 0 {
            return Err(LensError::Config(
                "search.oversample must be at least 1".to_string(),
            ));
        }
        if !(-1.0..=1.0).contains(&self.graph.threshold) {
            return Err(LensError::Config(format!(
                "graph.threshold {} is outside [-1, 1]",
                self.graph.threshold
            )));
        }
        if self.gateway.tokens_per_call > self.gateway.limiter.capacity {
            return Err(LensError::Config(format!(
                "gateway.tokens_per_call ({}) exceeds limiter capacity ({})",
                self.gateway.tokens_per_call, self.gateway.limiter.capacity
            )));
        }
        Ok(())
    }
}

/// Configuration for similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Results returned when the caller does not say.
    pub default_top_k: usize,

    /// Candidates examined per requested result before the score filter.
    pub oversample: usize,

    /// Numeric metadata field compared against the minimum score.
    pub score_field: String,

    /// Decimals kept in reported similarities.
    pub decimals: i32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            oversample: 2,
            score_field: "engagement_score".to_string(),
            decimals: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_is_default() {
        assert_eq!(LensConfig::from_toml_str("").unwrap(), LensConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = LensConfig::from_toml_str(
            r#"
            response_cache_path = "/tmp/lens/responses.json"

            [vector_cache]
            ttl_secs = 30

            [search]
            score_field = "likes"

            [gateway]
            default_model = "deepseek-reasoner"

            [gateway.limiter]
            capacity = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.vector_cache.ttl_secs, 30);
        assert_eq!(config.vector_cache.dimension, 512);
        assert_eq!(config.search.score_field, "likes");
        assert_eq!(config.search.oversample, 2);
        assert_eq!(config.gateway.default_model, "deepseek-reasoner");
        assert_eq!(config.gateway.limiter.capacity, 5);
        assert_eq!(config.gateway.limiter.refill_per_sec, 10.0);
        assert_eq!(config.graph.threshold, 0.7);
        assert_eq!(
            config.response_cache_path,
            Some(PathBuf::from("/tmp/lens/responses.json"))
        );
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = LensConfig::from_toml_str("[search]\noversample = 0").unwrap_err();
        assert!(matches!(err, LensError::Config(_)));

        let err = LensConfig::from_toml_str("[graph]\nthreshold = 1.5").unwrap_err();
        assert!(matches!(err, LensError::Config(_)));

        let err = LensConfig::from_toml_str("[vector_cache]\nttl_secs = \"soon\"").unwrap_err();
        assert!(matches!(err, LensError::Toml(_)));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lens.toml");
        std::fs::write(&path, "[search]\ndefault_top_k = 3\n").unwrap();

        let config = LensConfig::load(&path).unwrap();
        assert_eq!(config.search.default_top_k, 3);
    }
}
