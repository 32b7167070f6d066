//! Pipeline configuration
//!
//! Everything is read from the environment (after `.env` is loaded). Unset
//! variables take their defaults; set but malformed ones are errors.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::db::DATA_DIR_ENV;
use crate::graph::client::DEFAULT_GRAPH_API_BASE_URL;
use crate::graph::{GraphClientConfig, RetryPolicy};
use crate::rate_limiter::RateLimiterConfig;
use crate::utils::{env_millis, env_opt, env_parse, env_secs, validate_access_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Some(LogFormat::Text),
            "json" => Some(LogFormat::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub graph: GraphClientConfig,
    pub access_token: Option<String>,
    /// Tenant the daemon registers on startup
    pub tenant_id: Option<String>,
    pub data_dir: PathBuf,
    pub cache: CacheConfig,
    pub rate_limit: RateLimiterConfig,
    pub retry: RetryPolicy,
    /// Bound on a single directory call
    pub call_timeout: Duration,
    /// Resource types collected in parallel per tenant
    pub max_workers: usize,
    pub scheduler_tick: Duration,
    pub default_cadence: Duration,
    pub log_format: LogFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            graph: GraphClientConfig::default(),
            access_token: None,
            tenant_id: None,
            data_dir: PathBuf::from("./data"),
            cache: CacheConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(30),
            max_workers: 4,
            scheduler_tick: Duration::from_secs(60),
            default_cadence: Duration::from_secs(6 * 60 * 60),
            log_format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    /// Build configuration from environment variables
    ///
    /// # Errors
    /// Returns error naming the offending variable when a value is malformed
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let access_token = env_opt("GRAPH_ACCESS_TOKEN");
        if let Some(token) = &access_token {
            validate_access_token(token).context("Invalid GRAPH_ACCESS_TOKEN")?;
        }

        let log_format = match env_opt("LOG_FORMAT") {
            Some(raw) => LogFormat::from_str(&raw)
                .with_context(|| format!("Invalid value for LOG_FORMAT: {:?}", raw))?,
            None => defaults.log_format,
        };

        let call_timeout = env_secs("AUTOAUDIT_CALL_TIMEOUT_SECS", defaults.call_timeout)?;

        let config = Self {
            graph: GraphClientConfig {
                api_base: env_opt("GRAPH_API_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE_URL.to_string()),
                proxy_url: env_opt("DEV_PROXY_URL"),
                connect_timeout: defaults.graph.connect_timeout,
                request_timeout: call_timeout,
            },
            access_token,
            tenant_id: env_opt("AZURE_TENANT_ID"),
            data_dir: env_opt(DATA_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            cache: CacheConfig {
                ttl: env_secs("AUTOAUDIT_CACHE_TTL_SECS", defaults.cache.ttl)?,
                grace: env_secs("AUTOAUDIT_CACHE_GRACE_SECS", defaults.cache.grace)?,
                capacity: env_parse("AUTOAUDIT_CACHE_CAPACITY", defaults.cache.capacity)?,
            },
            rate_limit: RateLimiterConfig {
                capacity: env_parse("AUTOAUDIT_RATE_CAPACITY", defaults.rate_limit.capacity)?,
                refill_per_second: env_parse(
                    "AUTOAUDIT_RATE_REFILL_PER_SEC",
                    defaults.rate_limit.refill_per_second,
                )?,
                max_wait: env_secs("AUTOAUDIT_RATE_MAX_WAIT_SECS", defaults.rate_limit.max_wait)?,
                enabled: true,
            },
            retry: RetryPolicy {
                max_attempts: env_parse("AUTOAUDIT_RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                base_delay: env_millis("AUTOAUDIT_RETRY_BASE_MS", defaults.retry.base_delay)?,
                max_delay: env_millis("AUTOAUDIT_RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
                ..defaults.retry
            },
            call_timeout,
            max_workers: env_parse("AUTOAUDIT_MAX_WORKERS", defaults.max_workers)?,
            scheduler_tick: env_secs("AUTOAUDIT_SCHEDULER_TICK_SECS", defaults.scheduler_tick)?,
            default_cadence: env_secs("AUTOAUDIT_DEFAULT_CADENCE_SECS", defaults.default_cadence)?,
            log_format,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            anyhow::bail!("AUTOAUDIT_MAX_WORKERS must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("AUTOAUDIT_RETRY_MAX_ATTEMPTS must be at least 1");
        }
        if self.rate_limit.capacity == 0 || self.rate_limit.refill_per_second <= 0.0 {
            anyhow::bail!("Rate budget needs a positive capacity and refill rate");
        }
        if self.cache.grace < self.cache.ttl {
            anyhow::bail!("AUTOAUDIT_CACHE_GRACE_SECS must not be shorter than AUTOAUDIT_CACHE_TTL_SECS");
        }
        if self.default_cadence.is_zero() || self.scheduler_tick.is_zero() {
            anyhow::bail!("Scheduler tick and default cadence must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const VARS: &[&str] = &[
        "GRAPH_ACCESS_TOKEN",
        "GRAPH_API_BASE_URL",
        "DEV_PROXY_URL",
        "AZURE_TENANT_ID",
        "LOG_FORMAT",
        "AUTOAUDIT_DATA_DIR",
        "AUTOAUDIT_CACHE_TTL_SECS",
        "AUTOAUDIT_CACHE_GRACE_SECS",
        "AUTOAUDIT_MAX_WORKERS",
        "AUTOAUDIT_RETRY_BASE_MS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults_when_unset() {
        clear_env();
        let config = PipelineConfig::from_env().unwrap();

        assert_eq!(config.graph.api_base, DEFAULT_GRAPH_API_BASE_URL);
        assert!(config.graph.proxy_url.is_none());
        assert!(config.access_token.is_none());
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    #[serial]
    fn test_overrides_from_env() {
        clear_env();
        env::set_var("GRAPH_API_BASE_URL", "http://localhost:8000/v1.0");
        env::set_var("DEV_PROXY_URL", "http://127.0.0.1:8000");
        env::set_var("AZURE_TENANT_ID", "contoso");
        env::set_var("AUTOAUDIT_CACHE_TTL_SECS", "120");
        env::set_var("AUTOAUDIT_MAX_WORKERS", "2");
        env::set_var("AUTOAUDIT_RETRY_BASE_MS", "250");
        env::set_var("LOG_FORMAT", "JSON");

        let config = PipelineConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.graph.api_base, "http://localhost:8000/v1.0");
        assert_eq!(config.graph.proxy_url.as_deref(), Some("http://127.0.0.1:8000"));
        assert_eq!(config.tenant_id.as_deref(), Some("contoso"));
        assert_eq!(config.cache.ttl, Duration::from_secs(120));
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_malformed_values_are_errors() {
        clear_env();
        env::set_var("AUTOAUDIT_MAX_WORKERS", "many");
        let err = PipelineConfig::from_env().unwrap_err();
        clear_env();
        assert!(format!("{:#}", err).contains("AUTOAUDIT_MAX_WORKERS"));
    }

    #[test]
    #[serial]
    fn test_grace_shorter_than_ttl_rejected() {
        clear_env();
        env::set_var("AUTOAUDIT_CACHE_TTL_SECS", "600");
        env::set_var("AUTOAUDIT_CACHE_GRACE_SECS", "60");
        let result = PipelineConfig::from_env();
        clear_env();
        assert!(result.is_err());
    }

    #[test]
    #[serial]
    fn test_short_token_rejected() {
        clear_env();
        env::set_var("GRAPH_ACCESS_TOKEN", "abc");
        let result = PipelineConfig::from_env();
        clear_env();
        assert!(result.is_err());
    }
}
