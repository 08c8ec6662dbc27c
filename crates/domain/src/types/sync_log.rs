//! Append-only sync audit records

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CalSyncError;
use crate::impl_status_conversions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    Create,
    Update,
    Delete,
    Import,
    Recreated,
}

impl_status_conversions!(SyncOperation {
    Create => "create",
    Update => "update",
    Delete => "delete",
    Import => "import",
    Recreated => "recreated",
});

/// What triggered the sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Push,
    Pull,
    Bulk,
    Webhook,
}

impl_status_conversions!(SyncType {
    Push => "push",
    Pull => "pull",
    Bulk => "bulk",
    Webhook => "webhook",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failed,
    Partial,
    Skipped,
}

impl_status_conversions!(SyncStatus {
    Success => "success",
    Failed => "failed",
    Partial => "partial",
    Skipped => "skipped",
});

/// One row of the sync history. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub id: String,
    pub connection_id: String,
    pub appointment_id: Option<String>,
    pub operation: SyncOperation,
    pub sync_type: SyncType,
    pub status: SyncStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub details: serde_json::Value,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn new(
        connection_id: impl Into<String>,
        operation: SyncOperation,
        sync_type: SyncType,
        status: SyncStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            connection_id: connection_id.into(),
            appointment_id: None,
            operation,
            sync_type,
            status,
            error_code: None,
            error_message: None,
            details: serde_json::Value::Object(serde_json::Map::new()),
            duration_ms: 0,
            created_at,
        }
    }

    #[must_use]
    pub fn with_appointment(mut self, appointment_id: impl Into<String>) -> Self {
        self.appointment_id = Some(appointment_id.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, err: &CalSyncError) -> Self {
        self.error_code = Some(err.code().to_string());
        self.error_message = Some(err.to_string());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_records_error_code_and_duration() {
        let entry = SyncLogEntry::new(
            "conn-1",
            SyncOperation::Update,
            SyncType::Webhook,
            SyncStatus::Failed,
            Utc::now(),
        )
        .with_appointment("appt-1")
        .with_error(&CalSyncError::RateLimitExceeded("quota".into()))
        .with_duration(Duration::from_millis(42));

        assert_eq!(entry.appointment_id.as_deref(), Some("appt-1"));
        assert_eq!(entry.error_code.as_deref(), Some("rate_limit_exceeded"));
        assert_eq!(entry.duration_ms, 42);
    }
}
