//! Connection repository implementation
//!
//! Stores one row per operator calendar link. At most one row per operator is
//! active; inserting a new connection deactivates the previous one in the
//! same transaction.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::{Clock, ConnectionRepository as ConnectionRepositoryPort, SystemClock};
use calsync_domain::{from_millis, to_millis, Connection, Result as DomainResult, WebhookChannel};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension, Row};
use tokio::task;
use tracing::{debug, info};

use super::manager::DbManager;
use super::{map_join_error, map_sql_error};

/// Reason stored on a connection replaced by a newer consent.
pub const REPLACED_REASON: &str = "replaced";

const CONNECTION_COLUMNS: &str = "id, operator_id, access_token_encrypted, \
     refresh_token_encrypted, token_expires_at, token_version, calendar_id, account_email, \
     is_active, deactivation_reason, last_full_sync_at, sync_token, webhook_channel_id, \
     webhook_resource_id, webhook_expires_at, created_at, updated_at";

/// SqlCipher-based connection repository
pub struct SqlCipherConnectionRepository {
    db: Arc<DbManager>,
    clock: Arc<dyn Clock>,
}

impl SqlCipherConnectionRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db, clock: Arc::new(SystemClock) }
    }

    /// Stamp `updated_at` from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn run<T, F>(&self, op: F) -> DomainResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqlConnection) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);

        task::spawn_blocking(move || -> DomainResult<T> {
            let mut conn = db.get_connection()?;
            op(&mut conn).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl ConnectionRepositoryPort for SqlCipherConnectionRepository {
    async fn insert(&self, connection: &Connection) -> DomainResult<()> {
        let connection = connection.clone();
        let replaced = self.run(move |conn| insert_connection(conn, &connection)).await?;
        if replaced > 0 {
            info!(replaced, "previous active connection deactivated");
        }
        Ok(())
    }

    async fn find(&self, id: &str) -> DomainResult<Option<Connection>> {
        let id = id.to_string();
        self.run(move |conn| query_connection(conn, "id = ?1", &id)).await
    }

    async fn find_active_by_operator(&self, operator_id: &str) -> DomainResult<Option<Connection>> {
        let operator_id = operator_id.to_string();
        self.run(move |conn| query_connection(conn, "operator_id = ?1 AND is_active = 1", &operator_id))
            .await
    }

    async fn find_by_channel(&self, channel_id: &str) -> DomainResult<Option<Connection>> {
        let channel_id = channel_id.to_string();
        self.run(move |conn| {
            query_connection(conn, "webhook_channel_id = ?1 AND is_active = 1", &channel_id)
        })
        .await
    }

    async fn list_active(&self) -> DomainResult<Vec<Connection>> {
        self.run(|conn| list_connections(conn, None, true)).await
    }

    async fn list(&self, operator_id: Option<&str>) -> DomainResult<Vec<Connection>> {
        let operator_id = operator_id.map(str::to_string);
        self.run(move |conn| list_connections(conn, operator_id.as_deref(), false)).await
    }

    async fn update_tokens(
        &self,
        id: &str,
        access_token_encrypted: &str,
        refresh_token_encrypted: &str,
        expires_at: DateTime<Utc>,
        expected_version: i64,
    ) -> DomainResult<bool> {
        let id = id.to_string();
        let access = access_token_encrypted.to_string();
        let refresh = refresh_token_encrypted.to_string();
        let now = to_millis(self.clock.now());

        let updated = self
            .run(move |conn| {
                conn.execute(
                    "UPDATE connections
                     SET access_token_encrypted = ?1, refresh_token_encrypted = ?2,
                         token_expires_at = ?3, token_version = token_version + 1,
                         updated_at = ?4
                     WHERE id = ?5 AND token_version = ?6",
                    params![
                        access,
                        refresh,
                        to_millis(expires_at),
                        now,
                        id,
                        expected_version
                    ],
                )
            })
            .await?;

        if updated == 0 {
            debug!(expected_version, "token write lost the version race");
        }
        Ok(updated == 1)
    }

    async fn update_channel(&self, id: &str, channel: Option<&WebhookChannel>) -> DomainResult<()> {
        let id = id.to_string();
        let channel = channel.cloned();
        let now = to_millis(self.clock.now());
        self.run(move |conn| {
            conn.execute(
                "UPDATE connections
                 SET webhook_channel_id = ?1, webhook_resource_id = ?2,
                     webhook_expires_at = ?3, updated_at = ?4
                 WHERE id = ?5",
                params![
                    channel.as_ref().map(|c| c.channel_id.as_str()),
                    channel.as_ref().map(|c| c.resource_id.as_str()),
                    channel.as_ref().map(|c| to_millis(c.expires_at)),
                    now,
                    id
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn update_sync_token(&self, id: &str, sync_token: Option<&str>) -> DomainResult<()> {
        let id = id.to_string();
        let sync_token = sync_token.map(str::to_string);
        let now = to_millis(self.clock.now());
        self.run(move |conn| {
            conn.execute(
                "UPDATE connections SET sync_token = ?1, updated_at = ?2 WHERE id = ?3",
                params![sync_token, now, id],
            )
        })
        .await?;
        Ok(())
    }

    async fn record_full_sync(&self, id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        let id = id.to_string();
        let now = to_millis(self.clock.now());
        self.run(move |conn| {
            conn.execute(
                "UPDATE connections SET last_full_sync_at = ?1, updated_at = ?2 WHERE id = ?3",
                params![to_millis(at), now, id],
            )
        })
        .await?;
        Ok(())
    }

    async fn deactivate(&self, id: &str, reason: &str) -> DomainResult<()> {
        let id = id.to_string();
        let reason = reason.to_string();
        let now = to_millis(self.clock.now());
        self.run(move |conn| {
            conn.execute(
                "UPDATE connections
                 SET is_active = 0, deactivation_reason = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![reason, now, id],
            )
        })
        .await?;
        Ok(())
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

/// Returns how many previously active rows were deactivated.
fn insert_connection(conn: &mut SqlConnection, connection: &Connection) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;

    let replaced = tx.execute(
        "UPDATE connections
         SET is_active = 0, deactivation_reason = ?1, updated_at = ?2
         WHERE operator_id = ?3 AND is_active = 1 AND id != ?4",
        params![
            REPLACED_REASON,
            to_millis(connection.created_at),
            connection.operator_id,
            connection.id
        ],
    )?;

    tx.execute(
        &format!(
            "INSERT INTO connections ({CONNECTION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)"
        ),
        params![
            connection.id,
            connection.operator_id,
            connection.access_token_encrypted,
            connection.refresh_token_encrypted,
            to_millis(connection.token_expires_at),
            connection.token_version,
            connection.calendar_id,
            connection.account_email,
            connection.is_active,
            connection.deactivation_reason,
            connection.last_full_sync_at.map(to_millis),
            connection.sync_token,
            connection.webhook_channel_id,
            connection.webhook_resource_id,
            connection.webhook_expires_at.map(to_millis),
            to_millis(connection.created_at),
            to_millis(connection.updated_at),
        ],
    )?;

    tx.commit()?;
    Ok(replaced)
}

fn query_connection(
    conn: &SqlConnection,
    predicate: &str,
    value: &str,
) -> rusqlite::Result<Option<Connection>> {
    conn.query_row(
        &format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE {predicate}
             ORDER BY created_at DESC LIMIT 1"
        ),
        params![value],
        map_connection_row,
    )
    .optional()
}

fn list_connections(
    conn: &SqlConnection,
    operator_id: Option<&str>,
    active_only: bool,
) -> rusqlite::Result<Vec<Connection>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM connections
         WHERE (?1 IS NULL OR operator_id = ?1) AND (?2 = 0 OR is_active = 1)
         ORDER BY created_at DESC, id"
    ))?;

    let rows = stmt.query_map(params![operator_id, active_only], map_connection_row)?;
    rows.collect()
}

fn map_connection_row(row: &Row<'_>) -> rusqlite::Result<Connection> {
    Ok(Connection {
        id: row.get(0)?,
        operator_id: row.get(1)?,
        access_token_encrypted: row.get(2)?,
        refresh_token_encrypted: row.get(3)?,
        token_expires_at: from_millis(row.get(4)?),
        token_version: row.get(5)?,
        calendar_id: row.get(6)?,
        account_email: row.get(7)?,
        is_active: row.get(8)?,
        deactivation_reason: row.get(9)?,
        last_full_sync_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
        sync_token: row.get(11)?,
        webhook_channel_id: row.get(12)?,
        webhook_resource_id: row.get(13)?,
        webhook_expires_at: row.get::<_, Option<i64>>(14)?.map(from_millis),
        created_at: from_millis(row.get(15)?),
        updated_at: from_millis(row.get(16)?),
    })
}

// ============================================================================
// Tests
// ============================================================================
