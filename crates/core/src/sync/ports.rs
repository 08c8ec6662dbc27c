//! Port interfaces for sync state and dispatch

use async_trait::async_trait;
use calsync_domain::{
    Appointment, Connection, EventMapping, Result, RetryQueueItem, RetryStatus, SyncCounts,
    SyncLogEntry, SyncType, WebhookChannel,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Persistence for calendar connections.
#[async_trait]
pub trait ConnectionRepository: Send + Sync {
    /// Insert a connection, deactivating the operator's previously active one
    /// in the same transaction.
    async fn insert(&self, connection: &Connection) -> Result<()>;

    async fn find(&self, id: &str) -> Result<Option<Connection>>;

    async fn find_active_by_operator(&self, operator_id: &str) -> Result<Option<Connection>>;

    /// Active connection currently owning the given push channel.
    async fn find_by_channel(&self, channel_id: &str) -> Result<Option<Connection>>;

    async fn list_active(&self) -> Result<Vec<Connection>>;

    /// Every connection, newest first, optionally for one operator.
    async fn list(&self, operator_id: Option<&str>) -> Result<Vec<Connection>>;

    /// Write new encrypted tokens if `token_version` still equals
    /// `expected_version`. Returns `false` when another writer won.
    async fn update_tokens(
        &self,
        id: &str,
        access_token_encrypted: &str,
        refresh_token_encrypted: &str,
        expires_at: DateTime<Utc>,
        expected_version: i64,
    ) -> Result<bool>;

    /// Replace (or clear) the stored push channel.
    async fn update_channel(&self, id: &str, channel: Option<&WebhookChannel>) -> Result<()>;

    async fn update_sync_token(&self, id: &str, sync_token: Option<&str>) -> Result<()>;

    async fn record_full_sync(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn deactivate(&self, id: &str, reason: &str) -> Result<()>;
}

/// Appointment ↔ external event links.
#[async_trait]
pub trait EventMappingRepository: Send + Sync {
    async fn find(&self, appointment_id: &str) -> Result<Option<EventMapping>>;

    async fn find_by_external_id(
        &self,
        connection_id: &str,
        external_event_id: &str,
    ) -> Result<Option<EventMapping>>;

    /// Idempotent: returns the existing mapping when the appointment is
    /// already linked.
    async fn create(&self, mapping: &EventMapping) -> Result<EventMapping>;

    async fn update_last_synced(&self, mapping_id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn delete(&self, mapping_id: &str) -> Result<()>;

    async fn list_for_connection(&self, connection_id: &str) -> Result<Vec<EventMapping>>;
}

/// Append-only sync history.
#[async_trait]
pub trait SyncLogRepository: Send + Sync {
    async fn append(&self, entry: &SyncLogEntry) -> Result<()>;

    async fn recent(&self, connection_id: &str, limit: usize) -> Result<Vec<SyncLogEntry>>;

    async fn counts_since(&self, connection_id: &str, since: DateTime<Utc>) -> Result<SyncCounts>;

    async fn last_success_at(&self, connection_id: &str) -> Result<Option<DateTime<Utc>>>;
}

/// Durable retry items.
#[async_trait]
pub trait RetryQueueRepository: Send + Sync {
    /// Insert, or refresh `last_error` on the pending item for the same
    /// connection, kind and appointment. Returns the stored item.
    async fn upsert_pending(&self, item: &RetryQueueItem) -> Result<RetryQueueItem>;

    /// Pending items with `next_retry_at <= now`, oldest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<RetryQueueItem>>;

    async fn update(&self, item: &RetryQueueItem) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    async fn count(&self, connection_id: &str, status: RetryStatus) -> Result<u64>;
}

/// Read access to the booking system's appointments.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn get(&self, appointment_id: &str) -> Result<Option<Appointment>>;

    /// Appointments of any status overlapping the window.
    async fn list_in_range(
        &self,
        operator_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;
}

/// Unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJob {
    /// Upstream changes announced by a push notification.
    ConnectionChanged { connection_id: String },
    /// Local appointment change.
    Appointment { connection_id: String, appointment_id: String, sync_type: SyncType },
}

impl SyncJob {
    pub fn connection_id(&self) -> &str {
        match self {
            Self::ConnectionChanged { connection_id }
            | Self::Appointment { connection_id, .. } => connection_id,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("sync worker queue is full")]
    Saturated(SyncJob),
    #[error("sync workers are shut down")]
    Closed(SyncJob),
}

/// Non-blocking hand-off to the background workers.
pub trait SyncDispatcher: Send + Sync {
    fn try_dispatch(&self, job: SyncJob) -> std::result::Result<(), DispatchError>;
}
