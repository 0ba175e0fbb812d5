//! Cached, rate-limited access to generative AI providers.
//!
//! This crate provides:
//! - An OpenAI-compatible chat provider (DeepSeek by default)
//! - Prompt compression that runs before caching
//! - A content-addressed response cache with lazy TTL expiry and JSON persistence
//! - A token bucket limiter guarding outbound calls
//! - Usage accounting sinks
//!
//! [`GenerativeGateway`] ties these together.

pub mod cache;
pub mod clock;
pub mod compress;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod provider;
pub mod usage;

pub use cache::{CacheEntry, CacheKey, ResponseCache, ResponseCacheStats};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compress::{CompressionConfig, compress_prompt};
pub use error::{GatewayError, ProviderError, Result};
pub use gateway::{ChatRequest, ChatResponse, GatewayConfig, GenerativeGateway};
pub use limiter::{LimiterConfig, TokenBucketLimiter};
pub use provider::{
    Completion, CompletionRequest, GenerativeProvider, OpenAIChatProvider, TokenUsage,
};
pub use usage::{
    InMemoryUsageLog, JsonlUsageSink, ModelUsage, TracingUsageSink, UsageRecord, UsageSink,
    UsageSummary,
};
