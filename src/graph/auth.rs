//! Bearer token supply for Graph calls
//!
//! Token exchange against the identity platform happens outside this crate.
//! The pipeline only asks for a token per tenant.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::FetchError;
use crate::utils::validate_access_token;

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Bearer token for calls against `tenant_id`
    ///
    /// # Errors
    /// `FetchError::Permanent` when no usable credential exists for the tenant
    async fn bearer_token(&self, tenant_id: &str) -> Result<String, FetchError>;
}

/// Pre-issued tokens, one default plus optional per-tenant overrides
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    default_token: Option<String>,
    tenant_tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        validate_access_token(token)?;
        Ok(Self {
            default_token: Some(token.to_string()),
            tenant_tokens: HashMap::new(),
        })
    }

    pub fn with_tenant_token(mut self, tenant_id: &str, token: &str) -> anyhow::Result<Self> {
        validate_access_token(token)?;
        self.tenant_tokens
            .insert(tenant_id.to_string(), token.to_string());
        Ok(self)
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn bearer_token(&self, tenant_id: &str) -> Result<String, FetchError> {
        self.tenant_tokens
            .get(tenant_id)
            .or(self.default_token.as_ref())
            .cloned()
            .ok_or_else(|| {
                FetchError::Permanent(format!("no credentials configured for tenant {}", tenant_id))
            })
    }
}
