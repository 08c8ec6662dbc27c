//! Domain types and models

pub mod calendar;
pub mod connection;
pub mod mapping;
pub mod retry;
pub mod sync;
pub mod sync_log;

pub use calendar::{
    Appointment, AppointmentStatus, EventChanges, EventPayload, EventQuery, ExternalEvent,
    ExternalEventStatus,
};
pub use connection::{Connection, TokenPair, WebhookChannel};
pub use mapping::{EventMapping, SyncDirection};
pub use retry::{RetryDisposition, RetryKind, RetryQueueItem, RetryStatus};
pub use sync::{
    BulkSyncReport, BulkSyncRequest, ConnectionHealth, HealthStatus, RenewalSummary,
    ResourceState, SyncAction, SyncCounts, SyncItemError, SyncOutcome, WebhookNotification,
};
pub use sync_log::{SyncLogEntry, SyncOperation, SyncStatus, SyncType};

use chrono::{DateTime, TimeZone, Utc};

/// Convert an instant to the epoch-millisecond form used in storage.
pub fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Convert stored epoch milliseconds back to an instant.
///
/// Out-of-range values clamp to the Unix epoch rather than failing the read.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Generate a time-ordered identifier for new rows.
pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
