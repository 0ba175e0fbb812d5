//! The generative gateway.
//!
//! Every call goes through the same pipeline:
//!
//! ```text
//! compress ─► cache lookup ─┬─► hit: return cached text
//!                           └─► miss: rate limit ─► provider ─► cache write ─► usage log
//! ```
//!
//! Two identical requests racing past the cache lookup will both reach the
//! provider unless `single_flight` is enabled, in which case the second one
//! waits for the first and is answered from the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheKey, ResponseCache};
use crate::compress::{CompressionConfig, compress_prompt};
use crate::error::{GatewayError, ProviderError, Result};
use crate::limiter::{LimiterConfig, TokenBucketLimiter};
use crate::provider::{CompletionRequest, GenerativeProvider, TokenUsage};
use crate::usage::{TracingUsageSink, UsageRecord, UsageSink};

/// Configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Model used when a request does not name one.
    pub default_model: String,

    /// Generation limit used when a request does not set one.
    pub default_max_tokens: u32,

    /// Temperature used when a request does not set one.
    pub default_temperature: f32,

    /// Lifetime of cached responses in seconds.
    pub cache_ttl_secs: u64,

    /// Tokens taken from the bucket per provider call.
    pub tokens_per_call: u32,

    /// Collapse identical concurrent cache misses into one provider call.
    pub single_flight: bool,

    /// Default deadline covering the rate limit wait and the provider call.
    pub call_timeout_secs: Option<u64>,

    /// Rate limiter settings.
    pub limiter: LimiterConfig,

    /// Prompt compression settings.
    pub compression: CompressionConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_model: "deepseek-chat".to_string(),
            default_max_tokens: 1000,
            default_temperature: 0.7,
            cache_ttl_secs: 24 * 60 * 60,
            tokens_per_call: 1,
            single_flight: false,
            call_timeout_secs: None,
            limiter: LimiterConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Response cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Enable or disable single-flight.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Set the limiter settings.
    pub fn with_limiter(mut self, limiter: LimiterConfig) -> Self {
        self.limiter = limiter;
        self
    }
}

/// A chat request. Unset fields fall back to the gateway configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub use_cache: bool,
    /// Deadline for the rate limit wait plus the provider call.
    pub deadline: Option<Duration>,
}

impl ChatRequest {
    /// Create a cached request with default model settings.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            max_tokens: None,
            temperature: None,
            use_cache: true,
            deadline: None,
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the generation limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Enable or disable the response cache for this call.
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Set a deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// The result of a chat call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Generated (or cached) text.
    pub text: String,

    /// Whether the text came from the response cache.
    pub cached: bool,

    /// Fingerprint of the request.
    pub cache_key: CacheKey,

    /// Provider usage, for fresh responses.
    pub usage: Option<TokenUsage>,
}

type FlightMap = StdMutex<HashMap<CacheKey, Arc<Mutex<()>>>>;

/// Holds a key's in-flight slot and releases it on drop.
struct FlightGuard<'a> {
    map: &'a FlightMap,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if map
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            map.remove(&self.key);
        }
    }
}

/// Cached, rate-limited front for a generative provider.
pub struct GenerativeGateway {
    provider: Arc<dyn GenerativeProvider>,
    cache: Arc<ResponseCache>,
    limiter: Arc<TokenBucketLimiter>,
    usage: Arc<dyn UsageSink>,
    config: GatewayConfig,
    in_flight: FlightMap,
}

impl GenerativeGateway {
    /// Create a gateway, failing early if the provider is not usable.
    pub fn new(
        provider: Arc<dyn GenerativeProvider>,
        cache: Arc<ResponseCache>,
        config: GatewayConfig,
    ) -> Result<Self> {
        if !provider.is_available() {
            return Err(ProviderError::NotConfigured.into());
        }
        if config.tokens_per_call > config.limiter.capacity {
            return Err(GatewayError::Config(format!(
                "tokens_per_call ({}) exceeds limiter capacity ({})",
                config.tokens_per_call, config.limiter.capacity
            )));
        }

        Ok(Self {
            provider,
            cache,
            limiter: Arc::new(TokenBucketLimiter::from_config(&config.limiter)),
            usage: Arc::new(TracingUsageSink),
            config,
            in_flight: StdMutex::new(HashMap::new()),
        })
    }

    /// Replace the usage sink.
    pub fn with_usage_sink(mut self, usage: Arc<dyn UsageSink>) -> Self {
        self.usage = usage;
        self
    }

    /// Share an existing limiter, e.g. across gateways using one quota.
    pub fn with_limiter(mut self, limiter: Arc<TokenBucketLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the response cache.
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Get the rate limiter.
    pub fn limiter(&self) -> &Arc<TokenBucketLimiter> {
        &self.limiter
    }

    /// Run a chat request through the pipeline.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
        let model = request
            .model
            .unwrap_or_else(|| self.config.default_model.clone());
        let max_tokens = request.max_tokens.unwrap_or(self.config.default_max_tokens);
        let temperature = request
            .temperature
            .unwrap_or(self.config.default_temperature);

        let prompt = compress_prompt(&request.prompt, &self.config.compression);
        let key = CacheKey::for_request(&model, temperature, &prompt);

        if request.use_cache
            && let Some(text) = self.cache.get(&key).await
        {
            debug!("Cache hit for {key}");
            return Ok(Self::cached(text, key));
        }

        let _flight = if request.use_cache && self.config.single_flight {
            let flight = self.enter_flight(&key).await;
            if let Some(text) = self.cache.get(&key).await {
                debug!("Cache filled by concurrent call for {key}");
                return Ok(Self::cached(text, key));
            }
            Some(flight)
        } else {
            None
        };

        let deadline = request
            .deadline
            .or(self.config.call_timeout_secs.map(Duration::from_secs));
        let started = Instant::now();

        match deadline {
            Some(deadline) => {
                self.limiter
                    .acquire_timeout(self.config.tokens_per_call, deadline)
                    .await?
            }
            None => self.limiter.acquire(self.config.tokens_per_call).await?,
        }

        debug!(
            "Calling provider {} (model: {model}, max_tokens: {max_tokens})",
            self.provider.name()
        );
        let completion_request = CompletionRequest {
            prompt,
            model,
            max_tokens,
            temperature,
        };
        let call = self.provider.complete(&completion_request);
        let completion = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(started.elapsed());
                tokio::time::timeout(remaining, call)
                    .await
                    .map_err(|_| ProviderError::Timeout(deadline))??
            }
            None => call.await?,
        };

        if request.use_cache
            && let Err(e) = self
                .cache
                .put(&key, completion.text.clone(), self.config.cache_ttl())
                .await
        {
            warn!("Failed to persist cached response for {key}: {e}");
        }

        let record = UsageRecord::new(
            &completion_request.model,
            completion.usage,
            &completion_request.prompt,
            &completion.text,
        );
        if let Err(e) = self.usage.record(&record).await {
            warn!("Failed to record usage: {e:#}");
        }

        Ok(ChatResponse {
            text: completion.text,
            cached: false,
            cache_key: key,
            usage: Some(completion.usage),
        })
    }

    fn cached(text: String, key: CacheKey) -> ChatResponse {
        ChatResponse {
            text,
            cached: true,
            cache_key: key,
            usage: None,
        }
    }

    async fn enter_flight(&self, key: &CacheKey) -> FlightGuard<'_> {
        let slot = {
            let mut map = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        FlightGuard {
            map: &self.in_flight,
            key: key.clone(),
            guard: Some(guard),
        }
    }
}
