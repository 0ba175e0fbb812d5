//! Token bucket rate limiter.
//!
//! Tokens are refilled lazily from elapsed time on every acquisition attempt;
//! there is no background timer. Refill, the availability check and the
//! debit happen together under a short state lock that is never held across
//! an await. Waiters queue on a separate async mutex that they keep while
//! sleeping, so they are served in arrival order.

use std::sync::{Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{GatewayError, Result};

/// Upper bound on a single sleep while waiting for tokens.
const MAX_WAIT: Duration = Duration::from_secs(1);

/// Recheck interval when the bucket never refills.
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Configuration for the token bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Maximum number of stored tokens.
    pub capacity: u32,

    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, capacity: f64, rate: f64) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }

    /// Debit `needed` if available, otherwise report the shortfall.
    fn take(&mut self, needed: f64) -> std::result::Result<(), f64> {
        if self.tokens >= needed {
            self.tokens -= needed;
            Ok(())
        } else {
            Err(needed - self.tokens)
        }
    }
}

/// Admission control for outbound provider calls.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: u32,
    refill_rate: f64,
    state: StdMutex<BucketState>,
    /// Held by the waiter at the head of the line for its whole wait.
    queue: Mutex<()>,
}

impl TokenBucketLimiter {
    /// Create a full bucket.
    ///
    /// A negative or non-finite refill rate is treated as zero.
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let refill_rate = if refill_per_sec.is_finite() && refill_per_sec > 0.0 {
            refill_per_sec
        } else {
            0.0
        };

        Self {
            capacity,
            refill_rate,
            state: StdMutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
            queue: Mutex::new(()),
        }
    }

    /// Create a bucket from configuration.
    pub fn from_config(config: &LimiterConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec)
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Wait until `n` tokens are available, then take them.
    ///
    /// Never gives up on its own; wrap it in [`Self::acquire_timeout`] or drop
    /// the future to stop waiting. A dropped waiter takes nothing.
    pub async fn acquire(&self, n: u32) -> Result<()> {
        if n > self.capacity {
            return Err(GatewayError::ExceedsCapacity {
                requested: n,
                capacity: self.capacity,
            });
        }

        let needed = f64::from(n);
        let _turn = self.queue.lock().await;

        loop {
            let shortfall = match self.refilled().take(needed) {
                Ok(()) => return Ok(()),
                Err(shortfall) => shortfall,
            };

            let wait = if self.refill_rate > 0.0 {
                Duration::try_from_secs_f64(shortfall / self.refill_rate)
                    .unwrap_or(MAX_WAIT)
                    .min(MAX_WAIT)
            } else {
                IDLE_WAIT
            };
            debug!("Rate limited: need {n} tokens, short {shortfall:.2}, sleeping {wait:?}");
            tokio::time::sleep(wait).await;
        }
    }

    /// Like [`Self::acquire`], but fail with `RateLimitTimeout` after `deadline`.
    pub async fn acquire_timeout(&self, n: u32, deadline: Duration) -> Result<()> {
        match tokio::time::timeout(deadline, self.acquire(n)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::RateLimitTimeout(deadline)),
        }
    }

    /// Take `n` tokens only if they are available right now.
    ///
    /// Does not wait behind queued callers.
    pub fn try_acquire(&self, n: u32) -> bool {
        n <= self.capacity && self.refilled().take(f64::from(n)).is_ok()
    }

    /// Tokens currently available, after refilling.
    ///
    /// Never waits for queued callers.
    pub async fn available(&self) -> f64 {
        self.refilled().tokens
    }

    /// Lock the bucket state and bring it up to date.
    fn refilled(&self) -> MutexGuard<'_, BucketState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.refill(f64::from(self.capacity), self.refill_rate);
        state
    }
}
