//! Per-provider token buckets.
//!
//! Buckets refill lazily: every check first credits `floor(elapsed_ms / 60000 * rpm)` tokens
//! (capped at the burst limit) and only then consumes. Refill and consume happen under the same
//! lock, so concurrent callers never observe a half-updated bucket. Time comes from
//! [`tokio::time::Instant`] so paused test clocks drive refills.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

const WINDOW_MS: u64 = 60_000;

/// Errors raised by [`RateLimiter`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// No bucket has been configured for the provider.
    #[error("Rate limiter not configured for provider: {0}")]
    NotConfigured(String),
}

/// Token bucket parameters for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Sustained refill rate.
    pub requests_per_minute: u32,
    /// Bucket capacity.
    pub burst_limit: u32,
    /// Retry hint used when the refill rate is zero.
    pub retry_after: Duration,
}

#[derive(Debug)]
struct TokenBucket {
    config: RateLimitConfig,
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            tokens: config.burst_limit,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_millis();
        let earned = elapsed_ms * u128::from(self.config.requests_per_minute) / u128::from(WINDOW_MS);
        if earned > 0 {
            let earned = u32::try_from(earned).unwrap_or(u32::MAX);
            self.tokens = self
                .tokens
                .saturating_add(earned)
                .min(self.config.burst_limit);
            self.last_refill = now;
        }
    }
}

/// Token-bucket limiter keyed by provider name.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Create a limiter without any configured buckets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the bucket for `provider`, starting full.
    pub fn set_config(&self, provider: &str, config: RateLimitConfig) {
        tracing::debug!(
            provider,
            requests_per_minute = config.requests_per_minute,
            burst_limit = config.burst_limit,
            "Configured rate limit"
        );
        self.lock()
            .insert(provider.to_string(), TokenBucket::new(config));
    }

    /// Whether a bucket exists for `provider`.
    pub fn is_configured(&self, provider: &str) -> bool {
        self.lock().contains_key(provider)
    }

    /// Refill, then consume one token. Returns `false` when the bucket is empty.
    pub fn check_limit(&self, provider: &str) -> Result<bool, RateLimitError> {
        let mut buckets = self.lock();
        let bucket = buckets
            .get_mut(provider)
            .ok_or_else(|| RateLimitError::NotConfigured(provider.to_string()))?;
        bucket.refill(Instant::now());
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Time until a token is available; zero when one is available now.
    pub fn get_retry_after(&self, provider: &str) -> Result<Duration, RateLimitError> {
        let mut buckets = self.lock();
        let bucket = buckets
            .get_mut(provider)
            .ok_or_else(|| RateLimitError::NotConfigured(provider.to_string()))?;
        bucket.refill(Instant::now());
        if bucket.tokens > 0 {
            return Ok(Duration::ZERO);
        }
        let rpm = u64::from(bucket.config.requests_per_minute);
        if rpm == 0 {
            return Ok(bucket.config.retry_after);
        }
        Ok(Duration::from_millis(WINDOW_MS.div_ceil(rpm)))
    }

    /// Restore the full bucket for `provider`.
    pub fn reset(&self, provider: &str) -> Result<(), RateLimitError> {
        let mut buckets = self.lock();
        let bucket = buckets
            .get_mut(provider)
            .ok_or_else(|| RateLimitError::NotConfigured(provider.to_string()))?;
        bucket.tokens = bucket.config.burst_limit;
        bucket.last_refill = Instant::now();
        Ok(())
    }

    /// Tokens currently left for `provider`, without refilling.
    pub fn remaining(&self, provider: &str) -> Option<u32> {
        self.lock().get(provider).map(|bucket| bucket.tokens)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
