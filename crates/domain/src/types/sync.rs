//! Sync outcomes, reports and notification input

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::impl_status_conversions;

/// What the state machine did for one appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Recreated,
    /// Both sides changed; local data overwrote the event.
    ConflictResolved,
    Deleted,
    /// Mapping dropped; the external event was already gone.
    MappingRemoved,
    /// External-only change, left alone.
    Skipped,
    UpToDate,
    /// Event not managed by this engine.
    Ignored,
}

impl SyncAction {
    /// Whether the action changed local or external state.
    pub const fn is_mutation(self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Updated
                | Self::Recreated
                | Self::ConflictResolved
                | Self::Deleted
                | Self::MappingRemoved
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub connection_id: String,
    pub appointment_id: Option<String>,
    pub external_event_id: Option<String>,
    pub action: SyncAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncRequest {
    pub connection_id: Option<String>,
    pub operator_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItemError {
    pub connection_id: String,
    pub appointment_id: Option<String>,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSyncReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub errors: Vec<SyncItemError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalSummary {
    pub total: usize,
    pub renewed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
}

impl_status_conversions!(HealthStatus {
    Healthy => "healthy",
    Warning => "warning",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Dashboard view of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionHealth {
    pub connection_id: String,
    pub operator_id: String,
    pub account_email: String,
    pub is_active: bool,
    pub status: HealthStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub recent: SyncCounts,
    pub pending_retries: u64,
    pub permanent_failures: u64,
    pub webhook_expires_at: Option<DateTime<Utc>>,
    pub api_calls_in_window: u64,
    pub message: Option<String>,
}

/// `X-Goog-Resource-State` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Handshake sent right after `events.watch`.
    Sync,
    Exists,
    /// The watched calendar is gone.
    NotExists,
}

impl_status_conversions!(ResourceState {
    Sync => "sync",
    Exists => "exists",
    NotExists => "not_exists",
});

/// Push notification after header parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    pub channel_id: String,
    pub resource_id: String,
    pub resource_state: ResourceState,
    pub message_number: Option<u64>,
    pub channel_token: Option<String>,
}
