//! Retry queue items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sync_log::SyncType;
use crate::impl_status_conversions;

/// Operation to re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    /// Reconcile a single appointment.
    SyncAppointment,
    /// Re-list upstream changes for a whole connection.
    ConnectionChanges,
}

impl_status_conversions!(RetryKind {
    SyncAppointment => "sync_appointment",
    ConnectionChanges => "connection_changes",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStatus {
    Pending,
    FailedPermanently,
}

impl_status_conversions!(RetryStatus {
    Pending => "pending",
    FailedPermanently => "failed_permanently",
});

/// A failed sync operation awaiting re-attempt.
///
/// `attempt_count` doubles as the index into the backoff tier schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryQueueItem {
    pub id: String,
    pub connection_id: String,
    pub kind: RetryKind,
    pub appointment_id: Option<String>,
    pub sync_type: SyncType,
    pub attempt_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub status: RetryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RetryQueueItem {
    pub fn sync_appointment(
        connection_id: impl Into<String>,
        appointment_id: impl Into<String>,
        sync_type: SyncType,
        now: DateTime<Utc>,
    ) -> Self {
        Self::new(
            connection_id.into(),
            RetryKind::SyncAppointment,
            Some(appointment_id.into()),
            sync_type,
            now,
        )
    }

    pub fn connection_changes(connection_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(connection_id.into(), RetryKind::ConnectionChanges, None, SyncType::Webhook, now)
    }

    fn new(
        connection_id: String,
        kind: RetryKind,
        appointment_id: Option<String>,
        sync_type: SyncType,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            connection_id,
            kind,
            appointment_id,
            sync_type,
            attempt_count: 0,
            next_retry_at: now,
            last_error: None,
            status: RetryStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    #[must_use]
    pub fn due_at(mut self, next_retry_at: DateTime<Utc>) -> Self {
        self.next_retry_at = next_retry_at;
        self
    }
}

/// Result of recording a failed re-try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Rescheduled { attempt: u32, next_retry_at: DateTime<Utc> },
    PermanentlyFailed { attempts: u32 },
}
