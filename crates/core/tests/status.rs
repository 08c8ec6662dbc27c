//! Dashboard health derived from sync history and retries.

mod support;

use calsync_core::{RetryQueueRepository, SyncLogRepository, SyncStatusService};
use calsync_domain::{
    CalSyncError, HealthStatus, RetryQueueItem, RetryStatus, SyncLogEntry, SyncOperation,
    SyncStatus, SyncType, WebhookChannel,
};
use support::{t0, Harness};

fn service(h: &Harness) -> SyncStatusService {
    SyncStatusService::new(
        h.connections.clone(),
        h.sync_log.clone(),
        h.retries.clone(),
        h.calendar.clone(),
        h.clock.clone(),
    )
}

fn with_live_channel(h: &Harness) {
    let mut connection = h.connections.get("conn-1");
    let channel = WebhookChannel {
        channel_id: "chan".into(),
        resource_id: "res".into(),
        expires_at: t0() + chrono::Duration::days(5),
    };
    connection.webhook_channel_id = Some(channel.channel_id);
    connection.webhook_resource_id = Some(channel.resource_id);
    connection.webhook_expires_at = Some(channel.expires_at);
    h.connections.put(connection);
}

#[tokio::test]
async fn healthy_connection_has_no_message() {
    let h = Harness::new();
    with_live_channel(&h);
    h.sync_log
        .append(&SyncLogEntry::new(
            "conn-1",
            SyncOperation::Create,
            SyncType::Push,
            SyncStatus::Success,
            t0(),
        ))
        .await
        .unwrap();

    let overview = service(&h).overview(Some("operator-1")).await.unwrap();

    assert_eq!(overview.len(), 1);
    let health = &overview[0];
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.recent.success, 1);
    assert_eq!(health.last_sync_at, Some(t0()));
    assert!(health.message.is_none());
}

#[tokio::test]
async fn permanent_failures_surface_the_latest_error_category() {
    let h = Harness::new();
    with_live_channel(&h);
    h.sync_log
        .append(
            &SyncLogEntry::new(
                "conn-1",
                SyncOperation::Update,
                SyncType::Push,
                SyncStatus::Failed,
                t0(),
            )
            .with_error(&CalSyncError::RateLimitExceeded("quota exceeded for project 123".into())),
        )
        .await
        .unwrap();
    let mut item = RetryQueueItem::sync_appointment("conn-1", "appt-1", SyncType::Push, t0());
    item.status = RetryStatus::FailedPermanently;
    h.retries.upsert_pending(&item).await.unwrap();

    let health = service(&h).connection_health(&h.connections.get("conn-1")).await.unwrap();

    assert_eq!(health.status, HealthStatus::Warning);
    assert_eq!(health.permanent_failures, 1);
    let message = health.message.unwrap();
    assert!(message.contains("Too many calendar changes"));
    assert!(!message.contains("project 123"));
}

#[tokio::test]
async fn deactivated_connection_explains_reason() {
    let h = Harness::new();
    let mut connection = h.connections.get("conn-1");
    connection.is_active = false;
    connection.deactivation_reason = Some("calendar_deleted".into());
    h.connections.put(connection.clone());

    let health = service(&h).connection_health(&connection).await.unwrap();

    assert_eq!(health.status, HealthStatus::Warning);
    assert!(health.message.unwrap().contains("no longer exists"));
}

#[tokio::test]
async fn missing_channel_is_a_warning() {
    let h = Harness::new();

    let health = service(&h).connection_health(&h.connections.get("conn-1")).await.unwrap();

    assert_eq!(health.status, HealthStatus::Warning);
    assert!(health.webhook_expires_at.is_none());
}
