use anyhow::{Context, Result};
use rusqlite::Connection;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Index creation statements extracted for idempotent execution
/// These are safe to run on every init because they use IF NOT EXISTS
const INDEX_SQL: &str = "
CREATE INDEX IF NOT EXISTS idx_scan_runs_tenant_id ON scan_runs(tenant_id);
CREATE INDEX IF NOT EXISTS idx_scan_runs_state ON scan_runs(state);
CREATE INDEX IF NOT EXISTS idx_scan_runs_started_at ON scan_runs(started_at);
CREATE INDEX IF NOT EXISTS idx_findings_run_id ON findings(run_id);
CREATE INDEX IF NOT EXISTS idx_findings_rule_id ON findings(rule_id);
";

pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Get current database schema version
pub fn get_schema_version(conn: &Connection) -> Result<i64> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to get schema version")?;
    Ok(version)
}

/// Set database schema version
fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))
        .context("Failed to set schema version")?;
    Ok(())
}

/// Migrate from v0 (empty) to v1 (initial schema)
fn migrate_to_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)
        .context("Failed to execute v1 schema migration")?;

    conn.execute_batch(INDEX_SQL)
        .context("Failed to create v1 indexes")?;

    Ok(())
}

/// Migrate from v1 to v2 (scan trigger tracking)
/// Records whether a run was started by the cadence loop or on demand, and
/// indexes findings by verdict for report queries.
fn migrate_to_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "ALTER TABLE scan_runs ADD COLUMN triggered_by TEXT NOT NULL DEFAULT 'on_demand'
         CHECK(triggered_by IN ('on_demand', 'cadence'))",
        [],
    )
    .context("Failed to add scan_runs.triggered_by column")?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_findings_verdict ON findings(run_id, verdict)",
        [],
    )
    .context("Failed to create idx_findings_verdict index")?;

    Ok(())
}

/// Run all pending migrations
///
/// Each step runs inside its own transaction together with the version bump,
/// so a failed step leaves the previous version intact.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        anyhow::bail!(
            "Database schema version {} is newer than supported version {}",
            current_version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if current_version < 1 {
        apply(conn, 1, migrate_to_v1)?;
    }

    if current_version < 2 {
        apply(conn, 2, migrate_to_v2)?;
    }

    Ok(())
}

fn apply(conn: &Connection, version: i64, migration: fn(&Connection) -> Result<()>) -> Result<()> {
    let tx = conn
        .unchecked_transaction()
        .context("Failed to begin migration transaction")?;
    migration(&tx)?;
    set_schema_version(&tx, version)?;
    tx.commit()
        .with_context(|| format!("Failed to commit migration to v{}", version))?;
    tracing::info!(version, "database migrated");
    Ok(())
}
