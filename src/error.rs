//! Error taxonomy for the collection and assessment pipeline
//!
//! `FetchError` is what a single directory call can fail with. `PipelineError`
//! is what the command interface surfaces to collaborators. Cache misses and
//! stale snapshots are not errors; they are `Freshness` states.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Failure of one directory API call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("rate limited by directory API (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient directory API failure: {0}")]
    Transient(String),
    #[error("permanent directory API failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::Transient(_) => FailureKind::Transient,
            FetchError::Permanent(_) => FailureKind::Permanent,
        }
    }
}

/// Serializable classification of a `FetchError`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Transient,
    Permanent,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Transient => "transient",
            FailureKind::Permanent => "permanent",
        }
    }
}

/// Errors surfaced by the scheduler and command interface
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("tenant not found: {0}")]
    TenantNotFound(String),
    #[error("scan run not found: {0}")]
    RunNotFound(Uuid),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_kind() {
        assert_eq!(
            FetchError::RateLimited { retry_after: None }.kind(),
            FailureKind::RateLimited
        );
        assert_eq!(FetchError::Transient("503".into()).kind(), FailureKind::Transient);
        assert_eq!(FetchError::Permanent("403".into()).kind(), FailureKind::Permanent);
    }

    #[test]
    fn test_storage_error_keeps_context() {
        let err: PipelineError = anyhow::anyhow!("disk full").context("Failed to insert scan run").into();
        let message = err.to_string();
        assert!(message.contains("Failed to insert scan run"));
        assert!(message.contains("disk full"));
    }
}
