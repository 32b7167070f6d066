//! Rate-limited, retrying wrapper around a `DirectoryApi`
//!
//! Every attempt consumes one unit of the tenant's budget before it is sent.
//! Transient failures back off exponentially, a server retry-after delays the
//! next attempt by exactly that long, and permanent failures are returned
//! immediately.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DirectoryApi, Page};
use crate::error::FetchError;
use crate::models::ResourceType;
use crate::rate_limiter::RateLimiter;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Attempts per call, including the first one
    pub max_attempts: u32,
    /// Longest server retry-after that is waited out instead of surfaced
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
            max_retry_after: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let delay = self.base_delay.as_secs_f64() * self.factor.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

pub struct RateLimitedClient {
    api: Arc<dyn DirectoryApi>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    /// Bound on a single attempt, independent of the budget wait cap
    call_timeout: Duration,
    attempts: AtomicU64,
}

impl RateLimitedClient {
    pub fn new(
        api: Arc<dyn DirectoryApi>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            api,
            limiter,
            policy,
            call_timeout,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Total attempts sent through this client
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Fetch one page, retrying per the policy
    pub async fn fetch_page(
        &self,
        tenant_id: &str,
        resource_type: ResourceType,
        page_token: Option<String>,
    ) -> Result<Page, FetchError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.limiter.acquire(tenant_id).await?;
            self.attempts.fetch_add(1, Ordering::Relaxed);

            let call = self.api.list_page(tenant_id, resource_type, page_token.clone());
            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Transient(format!(
                    "call timed out after {}ms",
                    self.call_timeout.as_millis()
                ))),
            };

            let error = match result {
                Ok(page) => return Ok(page),
                Err(error) => error,
            };

            let delay = match &error {
                FetchError::Permanent(_) => return Err(error),
                FetchError::RateLimited {
                    retry_after: Some(retry_after),
                } => {
                    if *retry_after > self.policy.max_retry_after {
                        warn!(
                            tenant = tenant_id,
                            resource_type = %resource_type,
                            retry_after_secs = retry_after.as_secs(),
                            "retry-after beyond wait bound, giving up"
                        );
                        return Err(error);
                    }
                    *retry_after
                }
                FetchError::RateLimited { retry_after: None } | FetchError::Transient(_) => {
                    self.policy.delay_for(attempt)
                }
            };

            if attempt >= self.policy.max_attempts {
                warn!(
                    tenant = tenant_id,
                    resource_type = %resource_type,
                    attempts = attempt,
                    error = %error,
                    "retries exhausted"
                );
                return Err(error);
            }

            debug!(
                tenant = tenant_id,
                resource_type = %resource_type,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying directory call"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Lazy cursor over every page of one resource type
    pub fn pages(&self, tenant_id: &str, resource_type: ResourceType) -> PageCursor<'_> {
        PageCursor {
            client: self,
            tenant_id: tenant_id.to_string(),
            resource_type,
            next_token: None,
            pages_fetched: 0,
            done: false,
        }
    }
}

/// Finite, lazy pagination. A failed page ends the cursor; it can only be
/// restarted from the first page.
pub struct PageCursor<'a> {
    client: &'a RateLimitedClient,
    tenant_id: String,
    resource_type: ResourceType,
    next_token: Option<String>,
    pages_fetched: u32,
    done: bool,
}

impl PageCursor<'_> {
    pub async fn next(&mut self) -> Option<Result<Page, FetchError>> {
        if self.done {
            return None;
        }

        let token = self.next_token.take();
        match self
            .client
            .fetch_page(&self.tenant_id, self.resource_type, token.clone())
            .await
        {
            Ok(page) => {
                self.pages_fetched += 1;
                match &page.next_page_token {
                    Some(next) if token.as_ref() == Some(next) => {
                        warn!(
                            tenant = %self.tenant_id,
                            resource_type = %self.resource_type,
                            "continuation token repeated, ending pagination"
                        );
                        self.done = true;
                    }
                    Some(next) => self.next_token = Some(next.clone()),
                    None => self.done = true,
                }
                Some(Ok(page))
            }
            Err(error) => {
                self.done = true;
                Some(Err(error))
            }
        }
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub fn restart(&mut self) {
        self.next_token = None;
        self.pages_fetched = 0;
        self.done = false;
    }
}
