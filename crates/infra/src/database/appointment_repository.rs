//! Appointment store backed by the local `appointments` table
//!
//! The booking application writes appointments here (directly or through the
//! push trigger endpoint); the sync engine only reads them.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::AppointmentStore as AppointmentStorePort;
use calsync_domain::{from_millis, to_millis, Appointment, Result as DomainResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqlConnection, OptionalExtension, Row};
use tokio::task;

use super::manager::DbManager;
use super::{map_join_error, map_sql_error, parse_text_column};

const APPOINTMENT_COLUMNS: &str =
    "id, operator_id, title, description, location, starts_at, ends_at, status, updated_at";

/// SqlCipher-based appointment store
pub struct SqlCipherAppointmentStore {
    db: Arc<DbManager>,
}

impl SqlCipherAppointmentStore {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    /// Insert or replace an appointment row.
    pub async fn upsert(&self, appointment: &Appointment) -> DomainResult<()> {
        let db = Arc::clone(&self.db);
        let appointment = appointment.clone();

        task::spawn_blocking(move || -> DomainResult<()> {
            let conn = db.get_connection()?;
            upsert_appointment(&conn, &appointment).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl AppointmentStorePort for SqlCipherAppointmentStore {
    async fn get(&self, appointment_id: &str) -> DomainResult<Option<Appointment>> {
        let db = Arc::clone(&self.db);
        let appointment_id = appointment_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Option<Appointment>> {
            let conn = db.get_connection()?;
            conn.query_row(
                &format!("SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?1"),
                params![appointment_id],
                map_appointment_row,
            )
            .optional()
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn list_in_range(
        &self,
        operator_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DomainResult<Vec<Appointment>> {
        let db = Arc::clone(&self.db);
        let operator_id = operator_id.to_string();

        task::spawn_blocking(move || -> DomainResult<Vec<Appointment>> {
            let conn = db.get_connection()?;
            query_in_range(&conn, &operator_id, from, to).map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }
}

// ============================================================================
// SQL Operations (synchronous)
// ============================================================================

fn upsert_appointment(conn: &SqlConnection, appointment: &Appointment) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO appointments ({APPOINTMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                operator_id = excluded.operator_id,
                title = excluded.title,
                description = excluded.description,
                location = excluded.location,
                starts_at = excluded.starts_at,
                ends_at = excluded.ends_at,
                status = excluded.status,
                updated_at = excluded.updated_at"
        ),
        params![
            appointment.id,
            appointment.operator_id,
            appointment.title,
            appointment.description,
            appointment.location,
            to_millis(appointment.starts_at),
            to_millis(appointment.ends_at),
            appointment.status.as_str(),
            to_millis(appointment.updated_at),
        ],
    )?;
    Ok(())
}

fn query_in_range(
    conn: &SqlConnection,
    operator_id: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> rusqlite::Result<Vec<Appointment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments
         WHERE operator_id = ?1 AND ends_at >= ?2 AND starts_at <= ?3
         ORDER BY starts_at, id"
    ))?;
    let rows =
        stmt.query_map(params![operator_id, to_millis(from), to_millis(to)], map_appointment_row)?;
    rows.collect()
}

fn map_appointment_row(row: &Row<'_>) -> rusqlite::Result<Appointment> {
    let status: String = row.get(7)?;

    Ok(Appointment {
        id: row.get(0)?,
        operator_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        location: row.get(4)?,
        starts_at: from_millis(row.get(5)?),
        ends_at: from_millis(row.get(6)?),
        status: parse_text_column(7, &status)?,
        updated_at: from_millis(row.get(8)?),
    })
}
