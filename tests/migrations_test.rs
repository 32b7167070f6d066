//! Schema versioning against on-disk databases

use rusqlite::Connection;
use std::time::Duration;
use tempfile::TempDir;

use autoaudit::db::{self, migrations, Database};
use autoaudit::models::{ScanRun, ScanTrigger, Tenant};

#[test]
fn test_new_database_is_at_current_version() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open_in(temp_dir.path()).unwrap();

    let version = db.with_conn(migrations::get_schema_version).unwrap();
    assert_eq!(version, migrations::CURRENT_SCHEMA_VERSION);
}

#[test]
fn test_reopen_keeps_data_and_version() {
    let temp_dir = TempDir::new().unwrap();
    let run = ScanRun::new("contoso").with_trigger(ScanTrigger::Cadence);
    {
        let db = Database::open_in(temp_dir.path()).unwrap();
        db.with_conn(|conn| {
            db::insert_tenant(conn, &Tenant::new("contoso", "Contoso", Duration::from_secs(600)))?;
            db::insert_scan_run(conn, &run)
        })
        .unwrap();
    }

    let db = Database::open_in(temp_dir.path()).unwrap();
    let loaded = db
        .with_conn(|conn| db::select_scan_run(conn, &run.id))
        .unwrap()
        .unwrap();
    assert_eq!(loaded.triggered_by, ScanTrigger::Cadence);
    assert_eq!(
        db.with_conn(migrations::get_schema_version).unwrap(),
        migrations::CURRENT_SCHEMA_VERSION
    );
}

#[test]
fn test_newer_schema_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = db::get_db_path(temp_dir.path()).unwrap();
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
    }

    let err = Database::open(&path).err().unwrap();
    assert!(format!("{:#}", err).contains("newer than supported"));
}

#[test]
fn test_invalid_trigger_rejected_by_schema() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::open_in(temp_dir.path()).unwrap();
    let run = ScanRun::new("contoso");

    let result = db.with_conn(|conn| {
        db::insert_tenant(conn, &Tenant::new("contoso", "Contoso", Duration::from_secs(600)))?;
        db::insert_scan_run(conn, &run)?;
        conn.execute(
            "UPDATE scan_runs SET triggered_by = 'manual' WHERE id = ?1",
            [run.id.to_string()],
        )?;
        Ok(())
    });
    assert!(result.is_err());
}
