//! Sync log repository implementation
//!
//! Append-only: rows are inserted and read, never updated or deleted.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::SyncLogRepository as SyncLogRepositoryPort;
use calsync_domain::{
    from_millis, to_millis, Result as DomainResult, SyncCounts, SyncLogEntry, SyncStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error, parse_text_column};

const LOG_COLUMNS: &str = "id, connection_id, appointment_id, operation, sync_type, status, \
     error_code, error_message, details, duration_ms, created_at";

/// SqlCipher-based sync log repository
pub struct SqlCipherSyncLogRepository {
    db: Arc<DbManager>,
}

impl SqlCipherSyncLogRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SyncLogRepositoryPort for SqlCipherSyncLogRepository {
    async fn append(&self, entry: &SyncLogEntry) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let entry = entry.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            insert_entry(&conn, &entry).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn recent(&self, connection_id: &str, limit: usize) -> DomainResult<Vec<SyncLogEntry>> {
        let db = Arc::clone(&self.db);
        let connection_id = connection_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        task::spawn_blocking(move || -> DomainResult<Vec<SyncLogEntry>> {
            let conn = db.get_connection()?;
            query_recent(&conn, &connection_id, limit).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn counts_since(&self, connection_id: &str, since: DateTime<Utc>) -> DomainResult<SyncCounts> {
        let db = Arc::clone(&self.db);
        let connection_id = connection_id.to_string();

        task::spawn_blocking(move || -> DomainResult<SyncCounts> {
            let conn = db.get_connection()?;
            query_counts(&conn, &connection_id, since).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn last_success_at(&self, connection_id: &str) -> DomainResult<Option<DateTime<Utc>>> {
        let db = Arc::clone(&self.db);
        let connection_id = connection_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<DateTime<Utc>>> {
            let conn = db.get_connection()?;
            let latest: Option<i64> = conn
                .query_row(
                    "SELECT MAX(created_at) FROM sync_log WHERE connection_id = ?1 AND status = ?2",
                    params![connection_id, SyncStatus::Success.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(latest.map(from_millis))
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn insert_entry(conn: &SqlConnection, entry: &SyncLogEntry) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO sync_log ({LOG_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            entry.id,
            entry.connection_id,
            entry.appointment_id,
            entry.operation.as_str(),
            entry.sync_type.as_str(),
            entry.status.as_str(),
            entry.error_code,
            entry.error_message,
            entry.details.to_string(),
            entry.duration_ms,
            to_millis(entry.created_at),
        ],
    )?;
    Ok(())
}

fn query_recent(
    conn: &SqlConnection,
    connection_id: &str,
    limit: i64,
) -> rusqlite::Result<Vec<SyncLogEntry>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOG_COLUMNS} FROM sync_log
         WHERE connection_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![connection_id, limit], map_entry_row)?;
    rows.collect()
}

fn query_counts(
    conn: &SqlConnection,
    connection_id: &str,
    since: DateTime<Utc>,
) -> rusqlite::Result<SyncCounts> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM sync_log
         WHERE connection_id = ?1 AND created_at >= ?2
         GROUP BY status",
    )?;
    let rows = stmt.query_map(params![connection_id, to_millis(since)], |row| {
        let status: String = row.get(0)?;
        Ok((parse_text_column::<SyncStatus>(0, &status)?, row.get::<_, i64>(1)?))
    })?;

    let mut counts = SyncCounts::default();
    for row in rows {
        let (status, count) = row?;
        let count = u64::try_from(count).unwrap_or_default();
        match status {
            SyncStatus::Success => counts.success += count,
            SyncStatus::Failed => counts.failed += count,
            SyncStatus::Skipped | SyncStatus::Partial => counts.skipped += count,
        }
    }
    Ok(counts)
}

fn map_entry_row(row: &Row<'_>) -> rusqlite::Result<SyncLogEntry> {
    let operation: String = row.get(3)?;
    let sync_type: String = row.get(4)?;
    let status: String = row.get(5)?;
    let details: String = row.get(8)?;

    Ok(SyncLogEntry {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        appointment_id: row.get(2)?,
        operation: parse_text_column(3, &operation)?,
        sync_type: parse_text_column(4, &sync_type)?,
        status: parse_text_column(5, &status)?,
        error_code: row.get(6)?,
        error_message: row.get(7)?,
        details: serde_json::from_str(&details).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?,
        duration_ms: row.get(9)?,
        created_at: from_millis(row.get(10)?),
    })
}

// ============================================================================
// Tests
// ============================================================================
