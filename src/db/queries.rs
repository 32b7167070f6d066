use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::*;

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn invalid_value(idx: usize, column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("invalid {} value: {}", column, value).into(),
    )
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| conversion_error(idx, e))
}

// ===== TENANT CRUD =====

const TENANT_COLUMNS: &str = "id, display_name, cadence_secs, enabled_rules, created_at, updated_at";

fn row_to_tenant(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    let enabled_rules: String = row.get(3)?;
    let cadence_secs: i64 = row.get(2)?;
    Ok(Tenant {
        id: row.get(0)?,
        display_name: row.get(1)?,
        cadence_secs: cadence_secs.max(0) as u64,
        enabled_rules: parse_json(3, &enabled_rules)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn insert_tenant(conn: &Connection, tenant: &Tenant) -> Result<()> {
    let enabled_rules = serde_json::to_string(&tenant.enabled_rules)
        .context("Failed to serialize enabled rules")?;
    conn.execute(
        "INSERT INTO tenants (id, display_name, cadence_secs, enabled_rules, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            tenant.id,
            tenant.display_name,
            tenant.cadence_secs as i64,
            enabled_rules,
            tenant.created_at,
            tenant.updated_at
        ],
    )
    .context("Failed to insert tenant")?;

    Ok(())
}

pub fn update_tenant(conn: &Connection, tenant: &Tenant) -> Result<()> {
    let enabled_rules = serde_json::to_string(&tenant.enabled_rules)
        .context("Failed to serialize enabled rules")?;
    let updated = conn
        .execute(
            "UPDATE tenants SET display_name = ?, cadence_secs = ?, enabled_rules = ?, updated_at = ?
             WHERE id = ?",
            params![
                tenant.display_name,
                tenant.cadence_secs as i64,
                enabled_rules,
                tenant.updated_at,
                tenant.id
            ],
        )
        .context("Failed to update tenant")?;

    if updated == 0 {
        anyhow::bail!("Tenant {} does not exist", tenant.id);
    }
    Ok(())
}

pub fn select_tenant(conn: &Connection, id: &str) -> Result<Option<Tenant>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM tenants WHERE id = ?", TENANT_COLUMNS))
        .context("Failed to prepare select tenant query")?;

    let tenant = stmt
        .query_row(params![id], row_to_tenant)
        .optional()
        .context("Failed to query tenant")?;

    Ok(tenant)
}

pub fn select_tenants(conn: &Connection) -> Result<Vec<Tenant>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM tenants ORDER BY id", TENANT_COLUMNS))
        .context("Failed to prepare select tenants query")?;

    let tenants = stmt
        .query_map([], row_to_tenant)
        .context("Failed to map tenants from query")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect tenants")?;

    Ok(tenants)
}

// ===== SCAN RUN CRUD =====

const SCAN_RUN_COLUMNS: &str = "id, tenant_id, state, triggered_by, started_at, completed_at, outcomes, \
     failure_reason, total_findings, pass_count, fail_count, unknown_count";

fn row_to_scan_run(row: &Row<'_>) -> rusqlite::Result<ScanRun> {
    let id: String = row.get(0)?;
    let state: String = row.get(2)?;
    let triggered_by: String = row.get(3)?;
    let outcomes: String = row.get(6)?;
    let counts: [i64; 4] = [row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?];

    Ok(ScanRun {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        tenant_id: row.get(1)?,
        state: ScanState::from_str(&state).ok_or_else(|| invalid_value(2, "state", &state))?,
        triggered_by: ScanTrigger::from_str(&triggered_by)
            .ok_or_else(|| invalid_value(3, "triggered_by", &triggered_by))?,
        started_at: row.get(4)?,
        completed_at: row.get(5)?,
        outcomes: parse_json::<BTreeMap<ResourceType, TypeOutcome>>(6, &outcomes)?,
        failure_reason: row.get(7)?,
        summary: FindingSummary {
            total: counts[0].max(0) as u32,
            pass: counts[1].max(0) as u32,
            fail: counts[2].max(0) as u32,
            unknown: counts[3].max(0) as u32,
        },
    })
}

pub fn insert_scan_run(conn: &Connection, run: &ScanRun) -> Result<()> {
    let outcomes = serde_json::to_string(&run.outcomes).context("Failed to serialize outcomes")?;
    conn.execute(
        "INSERT INTO scan_runs (id, tenant_id, state, triggered_by, started_at, completed_at, outcomes,
             failure_reason, total_findings, pass_count, fail_count, unknown_count)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            run.id.to_string(),
            run.tenant_id,
            run.state.as_str(),
            run.triggered_by.as_str(),
            run.started_at,
            run.completed_at,
            outcomes,
            run.failure_reason,
            run.summary.total,
            run.summary.pass,
            run.summary.fail,
            run.summary.unknown
        ],
    )
    .context("Failed to insert scan run")?;

    Ok(())
}

pub fn update_scan_run(conn: &Connection, run: &ScanRun) -> Result<()> {
    let outcomes = serde_json::to_string(&run.outcomes).context("Failed to serialize outcomes")?;
    let updated = conn
        .execute(
            "UPDATE scan_runs SET state = ?, completed_at = ?, outcomes = ?, failure_reason = ?,
                 total_findings = ?, pass_count = ?, fail_count = ?, unknown_count = ?
             WHERE id = ?",
            params![
                run.state.as_str(),
                run.completed_at,
                outcomes,
                run.failure_reason,
                run.summary.total,
                run.summary.pass,
                run.summary.fail,
                run.summary.unknown,
                run.id.to_string()
            ],
        )
        .context("Failed to update scan run")?;

    if updated == 0 {
        anyhow::bail!("Scan run {} does not exist", run.id);
    }
    Ok(())
}

pub fn select_scan_run(conn: &Connection, id: &Uuid) -> Result<Option<ScanRun>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM scan_runs WHERE id = ?", SCAN_RUN_COLUMNS))
        .context("Failed to prepare select scan run query")?;

    let run = stmt
        .query_row(params![id.to_string()], row_to_scan_run)
        .optional()
        .context("Failed to query scan run")?;

    Ok(run)
}

/// Runs a previous process left in a non-terminal state
pub fn select_non_terminal_runs(conn: &Connection) -> Result<Vec<ScanRun>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM scan_runs WHERE state IN ('pending', 'collecting', 'evaluating')
             ORDER BY started_at",
            SCAN_RUN_COLUMNS
        ))
        .context("Failed to prepare select non-terminal runs query")?;

    let runs = stmt
        .query_map([], row_to_scan_run)
        .context("Failed to map scan runs from query")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect scan runs")?;

    Ok(runs)
}

pub fn select_runs_for_tenant(conn: &Connection, tenant_id: &str, limit: u32) -> Result<Vec<ScanRun>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM scan_runs WHERE tenant_id = ? ORDER BY started_at DESC LIMIT ?",
            SCAN_RUN_COLUMNS
        ))
        .context("Failed to prepare select tenant runs query")?;

    let runs = stmt
        .query_map(params![tenant_id, limit], row_to_scan_run)
        .context("Failed to map scan runs from query")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect scan runs")?;

    Ok(runs)
}

/// Start time of the most recent run of a tenant, whatever its state
pub fn select_last_run_started_at(conn: &Connection, tenant_id: &str) -> Result<Option<DateTime<Utc>>> {
    let started_at = conn
        .query_row(
            "SELECT MAX(started_at) FROM scan_runs WHERE tenant_id = ?",
            params![tenant_id],
            |row| row.get::<_, Option<DateTime<Utc>>>(0),
        )
        .context("Failed to query last run start")?;

    Ok(started_at)
}

// ===== FINDINGS =====

fn insert_findings(conn: &Connection, findings: &[Finding]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO findings (run_id, rule_id, resource_type, resource_id, verdict, evidence)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .context("Failed to prepare insert finding statement")?;

    for finding in findings {
        let evidence = serde_json::to_string(&finding.evidence).context("Failed to serialize evidence")?;
        stmt.execute(params![
            finding.run_id.to_string(),
            finding.rule_id,
            finding.resource_type.as_str(),
            finding.resource_id,
            finding.verdict.as_str(),
            evidence
        ])
        .with_context(|| {
            format!(
                "Failed to insert finding {} for {}",
                finding.rule_id, finding.resource_id
            )
        })?;
    }

    Ok(())
}

pub fn select_findings(conn: &Connection, run_id: &Uuid) -> Result<Vec<Finding>> {
    let mut stmt = conn
        .prepare(
            "SELECT run_id, rule_id, resource_type, resource_id, verdict, evidence
             FROM findings WHERE run_id = ? ORDER BY id",
        )
        .context("Failed to prepare select findings query")?;

    let findings = stmt
        .query_map(params![run_id.to_string()], |row| {
            let run_id: String = row.get(0)?;
            let resource_type: String = row.get(2)?;
            let verdict: String = row.get(4)?;
            let evidence: String = row.get(5)?;
            Ok(Finding {
                run_id: Uuid::parse_str(&run_id).map_err(|e| conversion_error(0, e))?,
                rule_id: row.get(1)?,
                resource_type: ResourceType::from_str(&resource_type)
                    .ok_or_else(|| invalid_value(2, "resource_type", &resource_type))?,
                resource_id: row.get(3)?,
                verdict: Verdict::from_str(&verdict).ok_or_else(|| invalid_value(4, "verdict", &verdict))?,
                evidence: parse_json(5, &evidence)?,
            })
        })
        .context("Failed to map findings from query")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("Failed to collect findings")?;

    Ok(findings)
}

// ===== LATEST RUN POINTER =====

pub fn select_latest_run(conn: &Connection, tenant_id: &str) -> Result<Option<ScanRun>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM scan_runs WHERE id = (SELECT run_id FROM latest_runs WHERE tenant_id = ?)",
            SCAN_RUN_COLUMNS
        ))
        .context("Failed to prepare select latest run query")?;

    let run = stmt
        .query_row(params![tenant_id], row_to_scan_run)
        .optional()
        .context("Failed to query latest run")?;

    Ok(run)
}

/// Persist a run reaching a terminal state in one transaction: the run row,
/// its findings and, when `publish` is set, the tenant's latest-run pointer.
pub fn finalize_scan_run(conn: &Connection, run: &ScanRun, findings: &[Finding], publish: bool) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("Failed to begin finalize transaction")?;

    update_scan_run(&tx, run)?;
    insert_findings(&tx, findings)?;

    if publish {
        tx.execute(
            "INSERT INTO latest_runs (tenant_id, run_id, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET run_id = excluded.run_id, updated_at = excluded.updated_at",
            params![run.tenant_id, run.id.to_string(), Utc::now()],
        )
        .context("Failed to update latest run pointer")?;
    }

    tx.commit().context("Failed to commit finalized scan run")?;
    Ok(())
}
