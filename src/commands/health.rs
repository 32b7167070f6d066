//! Health check
//!
//! The Microsoft Graph component is judged from configuration only; no call is
//! made. A skipped component never makes the overall status unhealthy.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use super::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Unhealthy,
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    pub detail: Option<String>,
}

impl ComponentHealth {
    fn healthy(detail: Option<String>) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            detail,
        }
    }

    fn unhealthy(detail: String) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            detail: Some(detail),
        }
    }

    fn skipped(detail: &str) -> Self {
        Self {
            status: ComponentStatus::Skipped,
            detail: Some(detail.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub status: ComponentStatus,
    pub components: BTreeMap<&'static str, ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == ComponentStatus::Healthy
    }
}

pub async fn health(state: &AppState) -> HealthReport {
    let mut components = BTreeMap::new();

    let database = match state.db.ping() {
        Ok(()) => ComponentHealth::healthy(None),
        Err(e) => {
            warn!("database health check failed: {:#}", e);
            ComponentHealth::unhealthy(format!("{:#}", e))
        }
    };
    components.insert("database", database);

    let graph = match &state.config.access_token {
        Some(_) => ComponentHealth::healthy(Some(state.config.graph.api_base.clone())),
        None => ComponentHealth::skipped("GRAPH_ACCESS_TOKEN not configured"),
    };
    components.insert("microsoft_graph", graph);

    let status = if components
        .values()
        .any(|component| component.status == ComponentStatus::Unhealthy)
    {
        ComponentStatus::Unhealthy
    } else {
        ComponentStatus::Healthy
    };

    HealthReport {
        status,
        components,
        checked_at: Utc::now(),
    }
}
