//! Retry queue repository implementation
//!
//! A partial unique index keeps at most one pending row per connection, kind
//! and appointment. Permanently failed rows stay for the status view.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::RetryQueueRepository as RetryQueueRepositoryPort;
use calsync_domain::{
    from_millis, to_millis, Result as DomainResult, RetryQueueItem, RetryStatus,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error, parse_text_column};

const RETRY_COLUMNS: &str = "id, connection_id, kind, appointment_id, sync_type, attempt_count, \
     next_retry_at, last_error, status, created_at, updated_at";

/// SqlCipher-based retry queue repository
pub struct SqlCipherRetryQueueRepository {
    db: Arc<DbManager>,
}

impl SqlCipherRetryQueueRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RetryQueueRepositoryPort for SqlCipherRetryQueueRepository {
    async fn upsert_pending(&self, item: &RetryQueueItem) -> DomainResult<RetryQueueItem> {
        let db = Arc::clone(&self.db);
        let item = item.clone();

        task::spawn_blocking(move || -> DomainResult<RetryQueueItem> {
            let mut conn = db.get_connection()?;
            upsert_pending(&mut conn, &item).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> DomainResult<Vec<RetryQueueItem>> {
        let db = Arc::clone(&self.db);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        task::spawn_blocking(move || -> DomainResult<Vec<RetryQueueItem>> {
            let conn = db.get_connection()?;
            query_due(&conn, now, limit).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update(&self, item: &RetryQueueItem) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let item = item.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            update_item(&conn, &item).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, id: &str) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let id = id.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM retry_queue WHERE id = ?1", params![id])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn count(&self, connection_id: &str, status: RetryStatus) -> DomainResult<u64> {
        let db = Arc::clone(&self.db);
        let connection_id = connection_id.to_string();

        task::spawn_blocking(move || -> DomainResult<u64> {
            let conn = db.get_connection()?;
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM retry_queue WHERE connection_id = ?1 AND status = ?2",
                    params![connection_id, status.as_str()],
                    |row| row.get(0),
                )
                .map_err(map_sql_error)?;
            Ok(u64::try_from(count).unwrap_or_default())
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn upsert_pending(conn: &mut SqlConnection, item: &RetryQueueItem) -> rusqlite::Result<RetryQueueItem> {
    let tx = conn.transaction()?;

    let existing = tx
        .query_row(
            &format!(
                "SELECT {RETRY_COLUMNS} FROM retry_queue
                 WHERE connection_id = ?1 AND kind = ?2
                   AND COALESCE(appointment_id, '') = COALESCE(?3, '')
                   AND status = 'pending'"
            ),
            params![item.connection_id, item.kind.as_str(), item.appointment_id],
            map_retry_row,
        )
        .optional()?;

    let stored = match existing {
        Some(mut pending) => {
            pending.last_error = item.last_error.clone();
            pending.updated_at = item.updated_at;
            tx.execute(
                "UPDATE retry_queue SET last_error = ?1, updated_at = ?2 WHERE id = ?3",
                params![pending.last_error, to_millis(pending.updated_at), pending.id],
            )?;
            pending
        }
        None => {
            insert_item(&tx, item)?;
            item.clone()
        }
    };

    tx.commit()?;
    Ok(stored)
}

fn insert_item(conn: &SqlConnection, item: &RetryQueueItem) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO retry_queue ({RETRY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            item.id,
            item.connection_id,
            item.kind.as_str(),
            item.appointment_id,
            item.sync_type.as_str(),
            item.attempt_count,
            to_millis(item.next_retry_at),
            item.last_error,
            item.status.as_str(),
            to_millis(item.created_at),
            to_millis(item.updated_at),
        ],
    )?;
    Ok(())
}

fn update_item(conn: &SqlConnection, item: &RetryQueueItem) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE retry_queue
         SET attempt_count = ?1, next_retry_at = ?2, last_error = ?3, status = ?4, updated_at = ?5
         WHERE id = ?6",
        params![
            item.attempt_count,
            to_millis(item.next_retry_at),
            item.last_error,
            item.status.as_str(),
            to_millis(item.updated_at),
            item.id,
        ],
    )?;
    Ok(())
}

fn query_due(
    conn: &SqlConnection,
    now: DateTime<Utc>,
    limit: i64,
) -> rusqlite::Result<Vec<RetryQueueItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RETRY_COLUMNS} FROM retry_queue
         WHERE status = 'pending' AND next_retry_at <= ?1
         ORDER BY next_retry_at, created_at
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![to_millis(now), limit], map_retry_row)?;
    rows.collect()
}

fn map_retry_row(row: &Row<'_>) -> rusqlite::Result<RetryQueueItem> {
    let kind: String = row.get(2)?;
    let sync_type: String = row.get(4)?;
    let status: String = row.get(8)?;

    Ok(RetryQueueItem {
        id: row.get(0)?,
        connection_id: row.get(1)?,
        kind: parse_text_column(2, &kind)?,
        appointment_id: row.get(3)?,
        sync_type: parse_text_column(4, &sync_type)?,
        attempt_count: row.get(5)?,
        next_retry_at: from_millis(row.get(6)?),
        last_error: row.get(7)?,
        status: parse_text_column(8, &status)?,
        created_at: from_millis(row.get(9)?),
        updated_at: from_millis(row.get(10)?),
    })
}

// ============================================================================
// Tests
// ============================================================================
