//! Event mapping repository implementation
//!
//! Links appointments to the calendar events created for them. Creation is
//! an upsert on `appointment_id`, so racing creators end up sharing one row.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::EventMappingRepository as EventMappingRepositoryPort;
use calsync_domain::{from_millis, to_millis, EventMapping, Result as DomainResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error, parse_text_column};

const MAPPING_COLUMNS: &str = "id, appointment_id, connection_id, external_event_id, \
     last_synced_at, direction, created_at";

/// SqlCipher-based event mapping repository
pub struct SqlCipherEventMappingRepository {
    db: Arc<DbManager>,
}

impl SqlCipherEventMappingRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventMappingRepositoryPort for SqlCipherEventMappingRepository {
    async fn find(&self, appointment_id: &str) -> DomainResult<Option<EventMapping>> {
        let db = Arc::clone(&self.db);
        let appointment_id = appointment_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<EventMapping>> {
            let conn = db.get_connection()?;
            query_by_appointment(&conn, &appointment_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn find_by_external_id(
        &self,
        connection_id: &str,
        external_event_id: &str,
    ) -> DomainResult<Option<EventMapping>> {
        let db = Arc::clone(&self.db);
        let connection_id = connection_id.to_string();
        let external_event_id = external_event_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<EventMapping>> {
            let conn = db.get_connection()?;
            query_by_external_id(&conn, &connection_id, &external_event_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn create(&self, mapping: &EventMapping) -> DomainResult<EventMapping> {
        let db = Arc::clone(&self.db);
        let mapping = mapping.clone();

        task::spawn_blocking(move || -> DomainResult<EventMapping> {
            let conn = db.get_connection()?;
            upsert_mapping(&conn, &mapping).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn update_last_synced(&self, mapping_id: &str, at: DateTime<Utc>) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let mapping_id = mapping_id.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute(
                "UPDATE event_mappings SET last_synced_at = ?1 WHERE id = ?2",
                params![to_millis(at), mapping_id],
            )
            .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn delete(&self, mapping_id: &str) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let mapping_id = mapping_id.to_string();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM event_mappings WHERE id = ?1", params![mapping_id])
                .map_err(map_sql_error)?;
            Ok(())
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_for_connection(&self, connection_id: &str) -> DomainResult<Vec<EventMapping>> {
        let db = Arc::clone(&self.db);
        let connection_id = connection_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Vec<EventMapping>> {
            let conn = db.get_connection()?;
            query_for_connection(&conn, &connection_id).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn upsert_mapping(conn: &SqlConnection, mapping: &EventMapping) -> rusqlite::Result<EventMapping> {
    conn.execute(
        &format!(
            "INSERT INTO event_mappings ({MAPPING_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(appointment_id) DO NOTHING"
        ),
        params![
            mapping.id,
            mapping.appointment_id,
            mapping.connection_id,
            mapping.external_event_id,
            to_millis(mapping.last_synced_at),
            mapping.direction.as_str(),
            to_millis(mapping.created_at),
        ],
    )?;

    query_by_appointment(conn, &mapping.appointment_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
}

fn query_by_appointment(
    conn: &SqlConnection,
    appointment_id: &str,
) -> rusqlite::Result<Option<EventMapping>> {
    conn.query_row(
        &format!("SELECT {MAPPING_COLUMNS} FROM event_mappings WHERE appointment_id = ?1"),
        params![appointment_id],
        map_mapping_row,
    )
    .optional()
}

fn query_by_external_id(
    conn: &SqlConnection,
    connection_id: &str,
    external_event_id: &str,
) -> rusqlite::Result<Option<EventMapping>> {
    conn.query_row(
        &format!(
            "SELECT {MAPPING_COLUMNS} FROM event_mappings
             WHERE connection_id = ?1 AND external_event_id = ?2"
        ),
        params![connection_id, external_event_id],
        map_mapping_row,
    )
    .optional()
}

fn query_for_connection(
    conn: &SqlConnection,
    connection_id: &str,
) -> rusqlite::Result<Vec<EventMapping>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MAPPING_COLUMNS} FROM event_mappings
         WHERE connection_id = ?1 ORDER BY created_at, id"
    ))?;
    let rows = stmt.query_map(params![connection_id], map_mapping_row)?;
    rows.collect()
}

fn map_mapping_row(row: &Row<'_>) -> rusqlite::Result<EventMapping> {
    let direction: String = row.get(5)?;

    Ok(EventMapping {
        id: row.get(0)?,
        appointment_id: row.get(1)?,
        connection_id: row.get(2)?,
        external_event_id: row.get(3)?,
        last_synced_at: from_millis(row.get(4)?),
        direction: parse_text_column(5, &direction)?,
        created_at: from_millis(row.get(6)?),
    })
}

// ============================================================================
// Tests
// ============================================================================
