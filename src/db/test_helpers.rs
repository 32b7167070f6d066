//! Test isolation and database setup helpers
//!
//! Provides utilities for proper test database isolation without race conditions

use super::Database;
use crate::models::Tenant;
use std::time::Duration;

/// Test database guard that manages an isolated on-disk database
/// Each guard gets its own temporary directory and database file
pub struct TestDbGuard {
    pub temp_dir: tempfile::TempDir,
}

impl TestDbGuard {
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().unwrap();
        TestDbGuard { temp_dir }
    }

    /// Open a fresh database with the current schema
    pub fn open(&self) -> anyhow::Result<Database> {
        Database::open(&self.temp_dir.path().join("autoaudit.db"))
    }

    /// Open a fresh database with one registered tenant
    pub fn open_with_tenant(&self, tenant_id: &str) -> anyhow::Result<Database> {
        let db = self.open()?;
        let tenant = Tenant::new(tenant_id, tenant_id, Duration::from_secs(3600));
        db.with_conn(|conn| super::insert_tenant(conn, &tenant))?;
        Ok(db)
    }
}

impl Default for TestDbGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_isolation() {
        {
            let guard1 = TestDbGuard::new();
            let db1 = guard1.open_with_tenant("contoso").expect("Failed to initialize database");
            let tenants = db1.with_conn(super::super::select_tenants).unwrap();
            assert_eq!(tenants.len(), 1);
        }

        // Second guard - should have clean database
        {
            let guard2 = TestDbGuard::new();
            let db2 = guard2.open().expect("Failed to initialize database");
            let tenants = db2.with_conn(super::super::select_tenants).unwrap();
            assert!(tenants.is_empty());
        }
    }
}
