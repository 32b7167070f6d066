//! Tenant registration and schedule commands

use std::time::Duration;
use tracing::info;

use super::AppState;
use crate::db;
use crate::error::{PipelineError, Result};
use crate::models::Tenant;

/// Register a tenant for assessment
///
/// # Arguments
/// * `cadence` - Interval between automatic scans; the configured default when `None`
/// * `enabled_rules` - Rule ids to apply; empty enables every built-in rule
///
/// # Errors
/// `InvariantViolation` for an empty id, a zero cadence, an unknown rule id,
/// or a tenant that is already registered
pub async fn register_tenant(
    state: &AppState,
    tenant_id: &str,
    display_name: &str,
    cadence: Option<Duration>,
    enabled_rules: Vec<String>,
) -> Result<Tenant> {
    let tenant_id = tenant_id.trim();
    if tenant_id.is_empty() {
        return Err(PipelineError::InvariantViolation(
            "tenant id cannot be empty".to_string(),
        ));
    }

    let cadence = cadence.unwrap_or(state.config.default_cadence);
    validate_schedule(state, Some(cadence), Some(&enabled_rules))?;

    let existing = state
        .db
        .with_conn(|conn| db::select_tenant(conn, tenant_id))?;
    if existing.is_some() {
        return Err(PipelineError::InvariantViolation(format!(
            "tenant {} is already registered",
            tenant_id
        )));
    }

    let mut tenant = Tenant::new(tenant_id, display_name, cadence);
    tenant.enabled_rules = enabled_rules;
    state.db.with_conn(|conn| db::insert_tenant(conn, &tenant))?;

    info!(
        tenant = %tenant.id,
        cadence_secs = tenant.cadence_secs,
        rules = tenant.enabled_rules.len(),
        "tenant registered"
    );
    Ok(tenant)
}

/// Change a tenant's cadence and/or enabled rules
///
/// Takes effect from the next run; an active run keeps the rules it started with.
pub async fn update_tenant_schedule(
    state: &AppState,
    tenant_id: &str,
    cadence: Option<Duration>,
    enabled_rules: Option<Vec<String>>,
) -> Result<Tenant> {
    validate_schedule(state, cadence, enabled_rules.as_ref())?;

    let mut tenant = state
        .db
        .with_conn(|conn| db::select_tenant(conn, tenant_id))?
        .ok_or_else(|| PipelineError::TenantNotFound(tenant_id.to_string()))?;

    tenant.update_schedule(cadence, enabled_rules);
    state.db.with_conn(|conn| db::update_tenant(conn, &tenant))?;

    info!(tenant = tenant_id, cadence_secs = tenant.cadence_secs, "tenant schedule updated");
    Ok(tenant)
}

pub async fn list_tenants(state: &AppState) -> Result<Vec<Tenant>> {
    Ok(state.db.with_conn(db::select_tenants)?)
}

fn validate_schedule(
    state: &AppState,
    cadence: Option<Duration>,
    enabled_rules: Option<&Vec<String>>,
) -> Result<()> {
    if let Some(cadence) = cadence {
        if cadence.as_secs() == 0 {
            return Err(PipelineError::InvariantViolation(
                "cadence must be at least one second".to_string(),
            ));
        }
    }
    if let Some(rules) = enabled_rules {
        state.scheduler.catalog().resolve(rules)?;
    }
    Ok(())
}
