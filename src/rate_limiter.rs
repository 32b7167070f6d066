//! Per-tenant rate budget for directory API calls
//!
//! Each tenant owns a token bucket refilled at a fixed rate. A caller that
//! finds the bucket empty is suspended until a token is available, up to
//! `max_wait`, after which the call fails with `FetchError::RateLimited`.
//! The bucket lock is never held across the suspension.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens in a full bucket (burst size per tenant)
    pub capacity: u32,
    /// Refill rate (tokens per second)
    pub refill_per_second: f64,
    /// Upper bound on how long a caller waits for budget
    pub max_wait: Duration,
    /// Whether to enable rate limiting (can be disabled for testing)
    pub enabled: bool,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_second: 5.0,
            max_wait: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Token bucket for rate limiting
struct TokenBucket {
    /// Maximum tokens in bucket
    capacity: u32,
    /// Current tokens available
    tokens: f64,
    /// Last time tokens were refilled
    last_refill: Instant,
    /// Refill rate (tokens per second)
    refill_rate: f64,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            last_refill: Instant::now(),
            refill_rate,
        }
    }

    /// Try to consume one token, returns true if successful
    fn try_consume(&mut self) -> bool {
        self.refill();

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Get time until next token is available
    fn time_until_available(&mut self) -> Option<Duration> {
        self.refill();

        if self.tokens >= 1.0 {
            None
        } else if self.refill_rate <= 0.0 {
            Some(Duration::MAX)
        } else {
            let tokens_needed = 1.0 - self.tokens;
            let seconds_needed = tokens_needed / self.refill_rate;
            // A vanishing refill rate reads as never
            Some(Duration::try_from_secs_f64(seconds_needed).unwrap_or(Duration::MAX))
        }
    }

    /// Time until the bucket is full again
    fn time_until_full(&mut self) -> Duration {
        self.refill();

        let missing = self.capacity as f64 - self.tokens;
        if missing <= 0.0 || self.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(missing / self.refill_rate).unwrap_or(Duration::MAX)
        }
    }

    /// Refill tokens based on elapsed time
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();

        let tokens_to_add = elapsed * self.refill_rate;
        self.tokens = (self.tokens + tokens_to_add).min(self.capacity as f64);
        self.last_refill = now;
    }
}

/// Point-in-time view of one tenant's budget
#[derive(Debug, Clone, PartialEq)]
pub struct RateBudget {
    pub tenant_id: String,
    pub remaining: u32,
    pub capacity: u32,
    /// When the bucket will be full again if no calls are made
    pub resets_at: DateTime<Utc>,
}

/// Rate limiter statistics
#[derive(Debug, Clone)]
pub struct RateLimiterStats {
    pub tenants_tracked: usize,
    pub total_calls: u64,
}

/// Rate limiter holding one token bucket per tenant
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    config: RateLimiterConfig,
    /// Track total admitted calls for monitoring
    total_calls: AtomicU64,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Create new rate limiter with default config
    pub fn new() -> Self {
        Self::with_config(RateLimiterConfig::default())
    }

    /// Create new rate limiter with custom config
    pub fn with_config(config: RateLimiterConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            total_calls: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn bucket(&self, tenant_id: &str) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::new(
                    self.config.capacity,
                    self.config.refill_per_second,
                )))
            })
            .clone()
    }

    /// Consume one unit of the tenant's budget, suspending until it is available
    ///
    /// # Errors
    /// `FetchError::RateLimited` when the budget would not be available within
    /// `max_wait`. The hint carries the time still needed for the next token.
    pub async fn acquire(&self, tenant_id: &str) -> Result<(), FetchError> {
        if !self.config.enabled {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let bucket = self.bucket(tenant_id);
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                if bucket.try_consume() {
                    self.total_calls.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                bucket.time_until_available().unwrap_or(Duration::ZERO)
            };

            let now = Instant::now();
            if wait > deadline.saturating_duration_since(now) {
                warn!(
                    tenant = tenant_id,
                    wait_ms = wait.as_millis() as u64,
                    "rate budget exhausted beyond wait bound"
                );
                return Err(FetchError::RateLimited {
                    retry_after: Some(wait),
                });
            }

            debug!(tenant = tenant_id, wait_ms = wait.as_millis() as u64, "waiting for rate budget");
            tokio::time::sleep(wait).await;
        }
    }

    /// Current budget of a tenant
    pub async fn budget(&self, tenant_id: &str) -> RateBudget {
        let bucket = self.bucket(tenant_id);
        let mut bucket = bucket.lock().await;
        let until_full = bucket.time_until_full();
        let now = Utc::now();
        let resets_at = chrono::Duration::from_std(until_full)
            .ok()
            .and_then(|until_full| now.checked_add_signed(until_full))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        RateBudget {
            tenant_id: tenant_id.to_string(),
            remaining: bucket.tokens.floor() as u32,
            capacity: bucket.capacity,
            resets_at,
        }
    }

    /// Get current statistics
    pub fn get_stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tenants_tracked: self.buckets.len(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
        }
    }

    /// Reset rate limiter (useful for testing)
    pub fn reset(&self) {
        self.buckets.clear();
        self.total_calls.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32, refill_per_second: f64, max_wait: Duration) -> RateLimiterConfig {
        RateLimiterConfig {
            capacity,
            refill_per_second,
            max_wait,
            enabled: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_allows_initial_requests() {
        let limiter = RateLimiter::with_config(config(5, 0.1, Duration::ZERO));

        // Should allow first 5 requests
        for _ in 0..5 {
            assert!(limiter.acquire("contoso").await.is_ok());
        }

        // 6th request should be rate limited
        let err = limiter.acquire("contoso").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after: Some(_) }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanishing_refill_rate_is_rate_limited() {
        let limiter = RateLimiter::with_config(config(1, 1e-300, Duration::from_secs(5)));

        limiter.acquire("contoso").await.unwrap();
        let err = limiter.acquire("contoso").await.unwrap_err();
        assert!(matches!(err, FetchError::RateLimited { retry_after: Some(_) }));

        let budget = limiter.budget("contoso").await;
        assert_eq!(budget.remaining, 0);
        assert!(budget.resets_at > Utc::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_waits_for_refill_within_bound() {
        let limiter = RateLimiter::with_config(config(1, 1.0, Duration::from_secs(5)));

        limiter.acquire("contoso").await.unwrap();

        let started = Instant::now();
        limiter.acquire("contoso").await.unwrap();
        let waited = started.elapsed();

        assert!(waited >= Duration::from_millis(900), "waited {:?}", waited);
        assert!(waited <= Duration::from_secs(2), "waited {:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_tenants_are_independent() {
        let limiter = RateLimiter::with_config(config(1, 0.01, Duration::ZERO));

        assert!(limiter.acquire("contoso").await.is_ok());
        assert!(limiter.acquire("contoso").await.is_err());
        assert!(limiter.acquire("fabrikam").await.is_ok());
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::with_config(RateLimiterConfig {
            capacity: 1,
            refill_per_second: 0.0,
            max_wait: Duration::ZERO,
            enabled: false, // Disabled
        });

        // Should allow unlimited requests when disabled
        for _ in 0..10 {
            assert!(limiter.acquire("contoso").await.is_ok());
        }
        assert_eq!(limiter.get_stats().total_calls, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_budget_and_stats() {
        let limiter = RateLimiter::with_config(config(5, 1.0, Duration::ZERO));

        // Make 3 requests
        for _ in 0..3 {
            let _ = limiter.acquire("contoso").await;
        }

        let budget = limiter.budget("contoso").await;
        assert_eq!(budget.capacity, 5);
        assert_eq!(budget.remaining, 2);
        assert!(budget.resets_at > Utc::now());

        let stats = limiter.get_stats();
        assert_eq!(stats.total_calls, 3);
        assert_eq!(stats.tenants_tracked, 1);

        limiter.reset();
        assert_eq!(limiter.get_stats().total_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_refill() {
        let mut bucket = TokenBucket::new(10, 10.0); // 10 tokens per second

        // Consume all tokens
        bucket.tokens = 0.0;
        bucket.last_refill = Instant::now();

        tokio::time::advance(Duration::from_millis(100)).await;

        // Should have refilled ~1 token
        bucket.refill();
        assert!(bucket.tokens >= 0.9 && bucket.tokens <= 1.1);
    }
}
