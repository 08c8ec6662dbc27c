//! Database connection manager backed by the SQLCipher pool.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use calsync_domain::{CalSyncError, DatabaseConfig, Result};
use rusqlite::params;
use tracing::info;

use super::pool::{SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig};
use super::map_sql_error;

const SCHEMA_VERSION: i32 = 1;
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Database manager that wraps an [`SqlCipherPool`].
#[derive(Debug)]
pub struct DbManager {
    pool: Arc<SqlCipherPool>,
    path: PathBuf,
}

impl DbManager {
    /// Create a new manager with the given pool size and SQLCipher key.
    pub fn new<P: AsRef<Path>>(
        db_path: P,
        pool_size: u32,
        encryption_key: Option<&str>,
    ) -> Result<Self> {
        let key = encryption_key
            .filter(|key| !key.is_empty())
            .ok_or_else(|| CalSyncError::Security("database encryption key not provided".into()))?;

        let path = db_path.as_ref().to_path_buf();
        let config =
            SqlCipherPoolConfig { max_size: pool_size.max(1), ..SqlCipherPoolConfig::default() };

        let pool = Arc::new(SqlCipherPool::new(&path, key, config)?);

        info!(
            db_path = %path.display(),
            max_connections = pool.max_size(),
            "sqlcipher pool initialised"
        );

        Ok(Self { pool, path })
    }

    /// Build from the `[database]` config section.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::new(&config.path, config.pool_size, config.encryption_key.as_deref())
    }

    /// Borrow the underlying SQLCipher pool.
    pub fn pool(&self) -> &Arc<SqlCipherPool> {
        &self.pool
    }

    /// Acquire a SQLCipher connection from the pool.
    pub fn get_connection(&self) -> Result<SqlCipherConnection> {
        self.pool.get_sqlcipher_connection()
    }

    /// Ensure the full schema exists on the current database.
    pub fn run_migrations(&self) -> Result<()> {
        let conn = self.get_connection()?;
        create_schema(&conn)
    }

    /// Return the configured database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a connection and run a trivial query.
    pub fn health_check(&self) -> Result<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", params![], |row| row.get::<_, i32>(0))
            .map_err(map_sql_error)?;
        Ok(())
    }
}

fn create_schema(conn: &SqlCipherConnection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL).map_err(map_sql_error)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, CAST(strftime('%s','now') AS INTEGER))",
        params![SCHEMA_VERSION],
    )
    .map_err(map_sql_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const TEST_KEY: &str = "test_key_64_chars_long_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn migrations_create_schema_version() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");

        let manager = DbManager::new(&db_path, 4, Some(TEST_KEY)).expect("manager created");
        manager.run_migrations().expect("migrations run");

        let conn = manager.get_connection().expect("connection acquired");
        let version: i32 =
            conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let manager =
            DbManager::new(temp_dir.path().join("test.db"), 2, Some(TEST_KEY)).expect("manager");

        manager.run_migrations().expect("first run");
        manager.run_migrations().expect("second run");
        manager.health_check().expect("health check passed");
    }

    #[test]
    fn manager_requires_encryption_key() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("test.db");

        assert!(matches!(DbManager::new(&db_path, 4, None), Err(CalSyncError::Security(_))));
        assert!(DbManager::new(&db_path, 4, Some("")).is_err());
    }
}
