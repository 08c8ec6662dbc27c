//! Shared test helpers for `calsync-core` integration tests.
//!
//! In-memory fakes for every port plus a [`Harness`] that wires them into
//! the services under test.

#![allow(dead_code)]

pub mod calendar;
pub mod repositories;

use std::sync::Arc;
use std::time::Duration;

use calsync_core::{
    RetryQueue, RetrySchedule, SyncProcessor, SyncProcessorConfig, WebhookIngress,
    WebhookRegistrationService,
};
use calsync_domain::{Appointment, AppointmentStatus, Connection};
use chrono::{DateTime, TimeZone, Utc};

pub use calendar::{ManualClock, MockCalendarApi, RecordingDispatcher};
pub use repositories::{
    MockAppointmentStore, MockConnectionRepository, MockMappingRepository, MockRetryRepository,
    MockSyncLogRepository,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid timestamp")
}

pub fn appointment(id: &str, operator_id: &str, updated_at: DateTime<Utc>) -> Appointment {
    Appointment {
        id: id.to_string(),
        operator_id: operator_id.to_string(),
        title: format!("Haircut {id}"),
        description: Some("Wash and cut".to_string()),
        location: Some("Chair 2".to_string()),
        starts_at: t0() + chrono::Duration::days(1),
        ends_at: t0() + chrono::Duration::days(1) + chrono::Duration::minutes(45),
        status: AppointmentStatus::Scheduled,
        updated_at,
    }
}

/// Every fake wired into the core services, sharing one manual clock.
pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub connections: Arc<MockConnectionRepository>,
    pub mappings: Arc<MockMappingRepository>,
    pub sync_log: Arc<MockSyncLogRepository>,
    pub retries: Arc<MockRetryRepository>,
    pub appointments: Arc<MockAppointmentStore>,
    pub calendar: Arc<MockCalendarApi>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub retry_queue: Arc<RetryQueue>,
    pub processor: Arc<SyncProcessor>,
    pub connection: Connection,
}

impl Harness {
    pub fn new() -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let connections = Arc::new(MockConnectionRepository::default());
        let mappings = Arc::new(MockMappingRepository::default());
        let sync_log = Arc::new(MockSyncLogRepository::default());
        let retries = Arc::new(MockRetryRepository::default());
        let appointments = Arc::new(MockAppointmentStore::default());
        let calendar = Arc::new(MockCalendarApi::new(clock.clone()));
        let dispatcher = Arc::new(RecordingDispatcher::default());

        let retry_queue =
            Arc::new(RetryQueue::new(retries.clone(), RetrySchedule::default(), clock.clone()));
        let processor = Arc::new(
            SyncProcessor::new(
                connections.clone(),
                mappings.clone(),
                sync_log.clone(),
                appointments.clone(),
                calendar.clone(),
                retry_queue.clone(),
                clock.clone(),
            )
            .with_config(SyncProcessorConfig {
                lock_timeout: Duration::from_secs(5),
                resolution_timeout: Duration::from_secs(10),
                ..SyncProcessorConfig::default()
            }),
        );

        let mut connection = Connection::new("operator-1", "primary", "owner@example.com", t0());
        connection.id = "conn-1".to_string();
        connections.put(connection.clone());

        Self {
            clock,
            connections,
            mappings,
            sync_log,
            retries,
            appointments,
            calendar,
            dispatcher,
            retry_queue,
            processor,
            connection,
        }
    }

    pub fn registration(&self) -> Arc<WebhookRegistrationService> {
        Arc::new(WebhookRegistrationService::new(
            self.connections.clone(),
            self.calendar.clone(),
            self.clock.clone(),
            "https://sync.example.com/webhooks/google-calendar",
            Some("channel-secret".to_string()),
            chrono::Duration::hours(24),
        ))
    }

    pub fn ingress(&self) -> WebhookIngress {
        WebhookIngress::new(
            self.connections.clone(),
            self.dispatcher.clone(),
            self.retry_queue.clone(),
            self.clock.clone(),
            Some("channel-secret".to_string()),
        )
    }
}
