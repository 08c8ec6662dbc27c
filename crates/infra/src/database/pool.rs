//! SQLCipher connection pool
//!
//! r2d2 pool of encrypted SQLite connections. Every new connection gets the
//! cipher key first, then WAL, foreign keys and a busy timeout.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::time::Duration;

use calsync_domain::{CalSyncError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection as RusqliteConnection;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

use crate::errors::InfraError;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct SqlCipherPoolConfig {
    pub max_size: u32,
    pub connection_timeout: Duration,
    pub busy_timeout: Duration,
    pub enable_wal: bool,
}

impl Default for SqlCipherPoolConfig {
    fn default() -> Self {
        Self {
            max_size: 8,
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
            enable_wal: true,
        }
    }
}

/// SQLCipher connection pool
#[derive(Debug)]
pub struct SqlCipherPool {
    pool: Pool<SqliteConnectionManager>,
    config: SqlCipherPoolConfig,
}

impl SqlCipherPool {
    /// Open (or create) the encrypted database and verify the key.
    ///
    /// # Errors
    /// `Security` when the key is rejected, `Database` for any other pool
    /// failure.
    #[instrument(skip(encryption_key), fields(db_path = ?path, pool_size = config.max_size))]
    pub fn new(path: &Path, encryption_key: &str, config: SqlCipherPoolConfig) -> Result<Self> {
        let key = Zeroizing::new(encryption_key.to_string());
        let init_config = config.clone();

        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.pragma_update(None, "key", key.as_str())?;
            conn.pragma_update(None, "cipher_compatibility", 4)?;
            apply_connection_pragmas(conn, &init_config)
        });

        let pool = Pool::builder()
            .max_size(config.max_size.max(1))
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .map_err(|e| {
                warn!("Failed to create connection pool: {}", e);
                CalSyncError::from(InfraError::from(e))
            })?;

        {
            let conn = pool.get().map_err(|e| CalSyncError::from(InfraError::from(e)))?;
            verify_encryption(&conn)?;
            debug!("Encryption verified successfully");
        }

        info!("SQLCipher pool created with {} connections", config.max_size);
        Ok(Self { pool, config })
    }

    /// Acquire a connection, waiting up to the configured timeout.
    pub fn get_sqlcipher_connection(&self) -> Result<SqlCipherConnection> {
        self.pool.get().map(SqlCipherConnection::new).map_err(|e| {
            warn!(timeout = ?self.config.connection_timeout, "Connection error: {}", e);
            CalSyncError::from(InfraError::from(e))
        })
    }

    pub fn max_size(&self) -> u32 {
        self.config.max_size
    }

    /// Connections currently checked out or idle.
    pub fn state(&self) -> r2d2::State {
        self.pool.state()
    }
}

fn apply_connection_pragmas(
    conn: &RusqliteConnection,
    config: &SqlCipherPoolConfig,
) -> rusqlite::Result<()> {
    let mut pragma_sql = String::new();
    if config.enable_wal {
        pragma_sql.push_str("PRAGMA journal_mode=WAL;\n");
        pragma_sql.push_str("PRAGMA wal_autocheckpoint=1000;\n");
    }
    pragma_sql.push_str("PRAGMA synchronous=NORMAL;\n");
    pragma_sql.push_str("PRAGMA foreign_keys=ON;\n");

    conn.execute_batch(&pragma_sql)?;
    conn.busy_timeout(config.busy_timeout)
}

/// A wrong key only shows up on the first read.
fn verify_encryption(conn: &RusqliteConnection) -> Result<()> {
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
        .map(|_| ())
        .map_err(|e| CalSyncError::from(InfraError::from(e)))
}

/// Pooled connection; returned to the pool on drop.
pub struct SqlCipherConnection {
    inner: PooledConnection<SqliteConnectionManager>,
}

impl SqlCipherConnection {
    pub fn new(conn: PooledConnection<SqliteConnectionManager>) -> Self {
        Self { inner: conn }
    }
}

impl Deref for SqlCipherConnection {
    type Target = RusqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for SqlCipherConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
