//! Microsoft Graph REST client
//!
//! Lists directory resources page by page, following `@odata.nextLink`.
//! HTTP failures are classified into the `FetchError` taxonomy here so that
//! the retry layer never has to look at status codes.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Proxy, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{CredentialProvider, DirectoryApi, Page};
use crate::error::FetchError;
use crate::models::ResourceType;

pub const DEFAULT_GRAPH_API_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Longest response body excerpt kept in error messages
const ERROR_BODY_LIMIT: usize = 256;

#[derive(Debug, Clone)]
pub struct GraphClientConfig {
    pub api_base: String,
    /// Local development proxy (e.g. Dev Proxy) all calls are routed through
    pub proxy_url: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for GraphClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GRAPH_API_BASE_URL.to_string(),
            proxy_url: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct GraphClient {
    /// HTTP client (reused across requests)
    http_client: Client,
    api_base: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl GraphClient {
    /// # Errors
    /// Returns error if the proxy URL is invalid or the TLS backend fails to initialize
    pub fn new(config: &GraphClientConfig, credentials: Arc<dyn CredentialProvider>) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(concat!("autoaudit/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &config.proxy_url {
            builder = builder.proxy(Proxy::all(proxy).context("Invalid DEV_PROXY_URL")?);
        }

        let http_client = builder.build().context("Failed to build Graph HTTP client")?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// First-page URL of a resource type, or the continuation link itself
    fn page_url(&self, resource_type: ResourceType, page_token: Option<String>) -> String {
        match page_token {
            Some(next_link) => next_link,
            None => format!("{}/{}", self.api_base, resource_type.graph_path()),
        }
    }
}

#[async_trait]
impl DirectoryApi for GraphClient {
    async fn list_page(
        &self,
        tenant_id: &str,
        resource_type: ResourceType,
        page_token: Option<String>,
    ) -> Result<Page, FetchError> {
        let token = self.credentials.bearer_token(tenant_id).await?;
        let url = self.page_url(resource_type, page_token);
        debug!(tenant = tenant_id, resource_type = %resource_type, url = %url, "Graph request");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, Utc::now()));
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let body: Value = response.json().await.map_err(classify_transport_error)?;
        Ok(parse_page(body))
    }
}

/// Map a non-success HTTP status onto the failure taxonomy
pub fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> FetchError {
    let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    match status.as_u16() {
        429 => FetchError::RateLimited { retry_after },
        // Graph sends Retry-After with 503 when a service is throttling
        503 if retry_after.is_some() => FetchError::RateLimited { retry_after },
        408 | 500..=599 => FetchError::Transient(format!("Graph API error ({}): {}", status, excerpt)),
        401 | 403 => FetchError::Permanent(format!("credentials rejected ({}): {}", status, excerpt)),
        _ => FetchError::Permanent(format!("Graph API error ({}): {}", status, excerpt)),
    }
}

fn classify_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        FetchError::Permanent(format!("invalid Graph request: {}", err))
    } else if err.is_decode() {
        FetchError::Permanent(format!("malformed Graph response: {}", err))
    } else {
        // timeouts, connection resets, refused connections
        FetchError::Transient(format!("Graph request failed: {}", err))
    }
}

/// Parse a Retry-After header given either as delta-seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Split a Graph response into items and continuation. Collection responses
/// carry a `value` array; singleton settings objects become a one-item page.
pub fn parse_page(mut body: Value) -> Page {
    let next_page_token = body
        .get("@odata.nextLink")
        .and_then(Value::as_str)
        .map(str::to_string);

    let items = match body.get_mut("value") {
        Some(Value::Array(items)) => Some(std::mem::take(items)),
        _ => None,
    };

    match items {
        Some(items) => Page {
            items,
            next_page_token,
        },
        None => {
            if let Value::Object(map) = &mut body {
                map.remove("@odata.context");
            }
            Page::last(vec![body])
        }
    }
}
