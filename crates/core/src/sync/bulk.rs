//! Bulk sync over a date range
//!
//! Runs every appointment in range through the same state machine as a
//! single sync, so conflict handling and retries are identical. Connections
//! run concurrently; appointments of one connection run in order.

use std::time::Instant;

use calsync_domain::constants::{BULK_SYNC_LOOKAHEAD_DAYS, BULK_SYNC_LOOKBACK_DAYS};
use calsync_domain::{
    BulkSyncReport, BulkSyncRequest, CalSyncError, Connection, Result, SyncItemError, SyncType,
};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::{info, instrument, warn};

use super::SyncProcessor;

impl SyncProcessor {
    /// Reconcile every appointment in `[from, to]` for the requested
    /// connections: one connection, an operator's active connection, or all
    /// active connections.
    #[instrument(skip(self), fields(connection_id = ?request.connection_id, operator_id = ?request.operator_id))]
    pub async fn bulk_sync(&self, request: BulkSyncRequest) -> Result<BulkSyncReport> {
        let started = Instant::now();
        let now = self.clock.now();
        let from = request.from.unwrap_or(now - Duration::days(BULK_SYNC_LOOKBACK_DAYS));
        let to = request.to.unwrap_or(now + Duration::days(BULK_SYNC_LOOKAHEAD_DAYS));
        if from > to {
            return Err(CalSyncError::InvalidInput(format!(
                "bulk sync range starts after it ends ({from} > {to})"
            )));
        }

        let connections = self.bulk_targets(&request).await?;
        let reports = join_all(
            connections.iter().map(|connection| self.bulk_sync_connection(connection, from, to, request.force)),
        )
        .await;

        let mut report = BulkSyncReport::default();
        for partial in reports {
            report.total += partial.total;
            report.successful += partial.successful;
            report.failed += partial.failed;
            report.skipped += partial.skipped;
            report.errors.extend(partial.errors);
        }
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        info!(
            connections = connections.len(),
            total = report.total,
            successful = report.successful,
            failed = report.failed,
            skipped = report.skipped,
            duration_ms = report.duration_ms,
            "bulk sync finished"
        );
        Ok(report)
    }

    async fn bulk_targets(&self, request: &BulkSyncRequest) -> Result<Vec<Connection>> {
        if let Some(connection_id) = request.connection_id.as_deref() {
            return Ok(self.active_connection(connection_id).await?.into_iter().collect());
        }
        if let Some(operator_id) = request.operator_id.as_deref() {
            return Ok(self.connections.find_active_by_operator(operator_id).await?.into_iter().collect());
        }
        self.connections.list_active().await
    }

    async fn bulk_sync_connection(
        &self,
        connection: &Connection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        force: bool,
    ) -> BulkSyncReport {
        let mut report = BulkSyncReport::default();

        let appointments =
            match self.appointments.list_in_range(&connection.operator_id, from, to).await {
                Ok(appointments) => appointments,
                Err(err) => {
                    warn!(connection_id = %connection.id, error = %err, "failed to list appointments for bulk sync");
                    report.failed += 1;
                    report.errors.push(SyncItemError {
                        connection_id: connection.id.clone(),
                        appointment_id: None,
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                    return report;
                }
            };

        for appointment in &appointments {
            report.total += 1;
            match self.sync_appointment(&connection.id, &appointment.id, SyncType::Bulk, force).await {
                Ok(outcome) if outcome.action.is_mutation() => report.successful += 1,
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(SyncItemError {
                        connection_id: connection.id.clone(),
                        appointment_id: Some(appointment.id.clone()),
                        code: err.code().to_string(),
                        message: err.to_string(),
                    });
                    if err.is_fatal_to_connection() {
                        warn!(connection_id = %connection.id, "connection lost mid bulk sync; stopping");
                        break;
                    }
                }
            }
        }

        if let Err(err) = self.connections.record_full_sync(&connection.id, self.clock.now()).await {
            warn!(connection_id = %connection.id, error = %err, "failed to record full sync time");
        }
        report
    }
}
