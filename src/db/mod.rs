use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub mod migrations;
pub mod queries;

#[cfg(test)]
pub mod test_helpers;

pub use migrations::run_migrations;
pub use queries::*;

pub const DATA_DIR_ENV: &str = "AUTOAUDIT_DATA_DIR";
const DB_FILE_NAME: &str = "autoaudit.db";

/// Database file path under `data_dir`, creating the directory if needed
pub fn get_db_path(data_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(data_dir)
        .context(format!("Failed to create data directory: {:?}", data_dir))?;

    Ok(data_dir.join(DB_FILE_NAME))
}

fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON")
        .context("Failed to enable foreign keys")?;

    // journal_mode reports the resulting mode; in-memory databases stay "memory"
    let _mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .context("Failed to enable WAL mode")?;

    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("Failed to set busy timeout")?;

    run_migrations(conn)?;
    Ok(())
}

/// Shared handle to the SQLite store
///
/// One connection guarded by a mutex gives read-your-writes within the
/// process. The lock is only held for the duration of a query closure.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (creating if needed) the database at `path` and run migrations
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context(format!("Failed to open database at {:?}", path))?;

        configure(&conn)?;
        tracing::info!(path = %path.display(), "database ready");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open `autoaudit.db` inside `data_dir`
    pub fn open_in(data_dir: &Path) -> Result<Self> {
        let path = get_db_path(data_dir)?;
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Run `f` with exclusive access to the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Cheap liveness probe for health checks
    pub fn ping(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .context("Database ping failed")?;
            Ok(())
        })
    }
}
