//! Sync status view for the operator dashboard

use std::sync::Arc;

use calsync_domain::constants::STATUS_RECENT_WINDOW_HOURS;
use calsync_domain::{
    user_message_for_code, Connection, ConnectionHealth, HealthStatus, Result, RetryStatus,
    SyncStatus,
};
use chrono::Duration;

use crate::calendar_ports::CalendarApi;
use crate::clock::Clock;
use crate::sync::ports::{ConnectionRepository, RetryQueueRepository, SyncLogRepository};

/// Recent log rows scanned for the latest failure.
const RECENT_LOG_SCAN: usize = 20;

pub struct SyncStatusService {
    connections: Arc<dyn ConnectionRepository>,
    sync_log: Arc<dyn SyncLogRepository>,
    retry_queue: Arc<dyn RetryQueueRepository>,
    calendar: Arc<dyn CalendarApi>,
    clock: Arc<dyn Clock>,
}

impl SyncStatusService {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        sync_log: Arc<dyn SyncLogRepository>,
        retry_queue: Arc<dyn RetryQueueRepository>,
        calendar: Arc<dyn CalendarApi>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { connections, sync_log, retry_queue, calendar, clock }
    }

    /// Health of every connection, optionally for one operator.
    pub async fn overview(&self, operator_id: Option<&str>) -> Result<Vec<ConnectionHealth>> {
        let connections = self.connections.list(operator_id).await?;
        let mut health = Vec::with_capacity(connections.len());
        for connection in &connections {
            health.push(self.connection_health(connection).await?);
        }
        Ok(health)
    }

    pub async fn connection_health(&self, connection: &Connection) -> Result<ConnectionHealth> {
        let now = self.clock.now();
        let since = now - Duration::hours(STATUS_RECENT_WINDOW_HOURS);

        let recent = self.sync_log.counts_since(&connection.id, since).await?;
        let last_sync_at = self.sync_log.last_success_at(&connection.id).await?;
        let pending_retries = self.retry_queue.count(&connection.id, RetryStatus::Pending).await?;
        let permanent_failures =
            self.retry_queue.count(&connection.id, RetryStatus::FailedPermanently).await?;

        let channel_live = connection.webhook_expires_at.is_some_and(|expires| expires > now);

        let message = if !connection.is_active {
            Some(
                user_message_for_code(
                    connection.deactivation_reason.as_deref().unwrap_or("credential_revoked"),
                )
                .to_string(),
            )
        } else if permanent_failures > 0 || recent.failed > recent.success {
            let latest_code = self
                .sync_log
                .recent(&connection.id, RECENT_LOG_SCAN)
                .await?
                .into_iter()
                .find(|entry| entry.status == SyncStatus::Failed)
                .and_then(|entry| entry.error_code);
            Some(user_message_for_code(latest_code.as_deref().unwrap_or("internal")).to_string())
        } else if !channel_live {
            Some("Live updates from Google Calendar are paused until the channel is renewed.".to_string())
        } else {
            None
        };

        let status = if message.is_some() { HealthStatus::Warning } else { HealthStatus::Healthy };

        Ok(ConnectionHealth {
            connection_id: connection.id.clone(),
            operator_id: connection.operator_id.clone(),
            account_email: connection.account_email.clone(),
            is_active: connection.is_active,
            status,
            last_sync_at,
            recent,
            pending_retries,
            permanent_failures,
            webhook_expires_at: connection.webhook_expires_at,
            api_calls_in_window: self.calendar.calls_in_window(&connection.id),
            message,
        })
    }
}
