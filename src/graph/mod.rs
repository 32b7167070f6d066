//! Directory API access
//!
//! `DirectoryApi` is the seam between the pipeline and Microsoft Graph.
//! `GraphClient` implements it over HTTPS; `RateLimitedClient` wraps any
//! implementation with the per-tenant budget and the retry policy.

pub mod auth;
pub mod client;
pub mod rate_limited;

pub use auth::{CredentialProvider, StaticTokenProvider};
pub use client::{GraphClient, GraphClientConfig};
pub use rate_limited::{PageCursor, RateLimitedClient, RetryPolicy};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::FetchError;
use crate::models::ResourceType;

/// One page of a paginated listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Opaque continuation token; `None` on the last page
    pub next_page_token: Option<String>,
}

impl Page {
    pub fn last(items: Vec<Value>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }

    pub fn with_next(items: Vec<Value>, next_page_token: &str) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.to_string()),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// Fetch one page of `resource_type` for a tenant, starting from the first
    /// page when `page_token` is `None`
    async fn list_page(
        &self,
        tenant_id: &str,
        resource_type: ResourceType,
        page_token: Option<String>,
    ) -> Result<Page, FetchError>;
}
