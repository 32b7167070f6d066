//! Scan run commands

use serde::Serialize;
use tracing::info;

use super::AppState;
use crate::db;
use crate::error::{PipelineError, Result};
use crate::models::{Finding, ScanRun, ScanRunId, ScanTrigger};
use crate::report::{ComplianceReport, ReportGenerator};

const MAX_RUNS_LISTED: u32 = 100;

/// A run together with the findings it produced
#[derive(Debug, Clone, Serialize)]
pub struct RunDetails {
    pub run: ScanRun,
    pub findings: Vec<Finding>,
}

/// Start an on-demand scan
///
/// Returns the id of the tenant's active run if one exists.
pub async fn trigger_scan(state: &AppState, tenant_id: &str) -> Result<ScanRunId> {
    let run_id = state.scheduler.trigger_scan(tenant_id, ScanTrigger::OnDemand)?;
    info!(tenant = tenant_id, run_id = %run_id, "on-demand scan requested");
    Ok(run_id)
}

pub async fn get_run(state: &AppState, run_id: ScanRunId) -> Result<RunDetails> {
    let (run, findings) = state.scheduler.get_run(run_id)?;
    Ok(RunDetails { run, findings })
}

/// Latest Completed or PartiallyCompleted run of a tenant
pub async fn get_latest_run(state: &AppState, tenant_id: &str) -> Result<Option<ScanRun>> {
    ensure_tenant(state, tenant_id)?;
    state.scheduler.get_latest_run(tenant_id)
}

/// Recent runs of a tenant, newest first
pub async fn list_runs(state: &AppState, tenant_id: &str, limit: Option<u32>) -> Result<Vec<ScanRun>> {
    ensure_tenant(state, tenant_id)?;
    let limit = limit.unwrap_or(20).clamp(1, MAX_RUNS_LISTED);
    Ok(state
        .db
        .with_conn(|conn| db::select_runs_for_tenant(conn, tenant_id, limit))?)
}

pub async fn cancel_run(state: &AppState, run_id: ScanRunId) -> Result<ScanRun> {
    state.scheduler.cancel_run(run_id).await
}

pub async fn get_report(state: &AppState, run_id: ScanRunId) -> Result<ComplianceReport> {
    let (run, findings) = state.scheduler.get_run(run_id)?;
    let generator = ReportGenerator::new(state.scheduler.catalog());
    Ok(generator.generate(&run, &findings))
}

fn ensure_tenant(state: &AppState, tenant_id: &str) -> Result<()> {
    state
        .db
        .with_conn(|conn| db::select_tenant(conn, tenant_id))?
        .map(|_| ())
        .ok_or_else(|| PipelineError::TenantNotFound(tenant_id.to_string()))
}
