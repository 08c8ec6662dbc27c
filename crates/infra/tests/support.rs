//! Shared harness for infra integration tests: an encrypted database with
//! migrations applied and a fully wired sync processor whose Google endpoints
//! point at a wiremock server.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use calsync_core::{
    ConnectionRepository, CredentialVault, RetryQueue, RetrySchedule, SyncProcessor, SystemClock,
};
use calsync_domain::{Appointment, AppointmentStatus, Connection, GoogleConfig};
use calsync_infra::database::{
    DbManager, SqlCipherAppointmentStore, SqlCipherConnectionRepository,
    SqlCipherEventMappingRepository, SqlCipherRetryQueueRepository, SqlCipherSyncLogRepository,
};
use calsync_infra::google::{GoogleCalendarClient, GoogleTokenRefresher, RateLimitedHttp};
use calsync_infra::vault::{EncryptedCredentialVault, TokenCipher};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tempfile::TempDir;

pub const TEST_DB_KEY: &str = "test_key_64_chars_long_aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

/// Temporary encrypted database kept alive for the duration of a test.
pub struct TestDatabase {
    pub manager: Arc<DbManager>,
    _temp_dir: TempDir,
}

impl TestDatabase {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir should be created");
        let db_path = temp_dir.path().join("calsync-integration.db");

        let manager = Arc::new(
            DbManager::new(&db_path, 4, Some(TEST_DB_KEY)).expect("db manager should be created"),
        );
        manager.run_migrations().expect("schema migrations should apply");

        Self { manager, _temp_dir: temp_dir }
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Every production component over one database and one mock Google host.
pub struct SyncHarness {
    pub db: TestDatabase,
    pub connections: Arc<SqlCipherConnectionRepository>,
    pub mappings: Arc<SqlCipherEventMappingRepository>,
    pub sync_log: Arc<SqlCipherSyncLogRepository>,
    pub retry_repo: Arc<SqlCipherRetryQueueRepository>,
    pub appointments: Arc<SqlCipherAppointmentStore>,
    pub vault: Arc<EncryptedCredentialVault>,
    pub processor: Arc<SyncProcessor>,
}

impl SyncHarness {
    /// `google_base` serves both the Calendar API and the `/token` endpoint.
    pub fn new(google_base: &str) -> Self {
        let db = TestDatabase::new();
        let manager = Arc::clone(&db.manager);
        let clock = Arc::new(SystemClock);

        let connections = Arc::new(SqlCipherConnectionRepository::new(Arc::clone(&manager)));
        let mappings = Arc::new(SqlCipherEventMappingRepository::new(Arc::clone(&manager)));
        let sync_log = Arc::new(SqlCipherSyncLogRepository::new(Arc::clone(&manager)));
        let retry_repo = Arc::new(SqlCipherRetryQueueRepository::new(Arc::clone(&manager)));
        let appointments = Arc::new(SqlCipherAppointmentStore::new(manager));

        let google = GoogleConfig {
            api_base_url: google_base.to_string(),
            token_url: format!("{google_base}/token"),
            client_id: "client-id".into(),
            client_secret: "client-secret".into(),
            webhook_callback_url: "https://sync.example.com/webhooks/google-calendar".into(),
            channel_token: None,
        };
        let refresher = Arc::new(
            GoogleTokenRefresher::new(&google, Duration::from_secs(5))
                .expect("token refresher should build"),
        );
        let cipher = Arc::new(TokenCipher::new(&[7u8; 32]).expect("cipher key is valid"));
        let vault = Arc::new(EncryptedCredentialVault::new(
            connections.clone(),
            cipher,
            refresher,
            clock.clone(),
        ));

        let http = RateLimitedHttp::builder()
            .max_attempts(2)
            .min_spacing(Duration::ZERO)
            .base_backoff(Duration::from_millis(5))
            .max_backoff(Duration::from_millis(20))
            .build()
            .expect("http client should build");
        let calendar = Arc::new(GoogleCalendarClient::new(
            Arc::new(http),
            vault.clone() as Arc<dyn CredentialVault>,
            google_base,
        ));

        let retry_queue = Arc::new(RetryQueue::new(
            retry_repo.clone(),
            RetrySchedule::new(vec![
                Duration::from_secs(60),
                Duration::from_secs(300),
                Duration::from_secs(900),
            ]),
            clock.clone(),
        ));

        let processor = Arc::new(SyncProcessor::new(
            connections.clone(),
            mappings.clone(),
            sync_log.clone(),
            appointments.clone(),
            calendar,
            retry_queue,
            clock,
        ));

        Self { db, connections, mappings, sync_log, retry_repo, appointments, vault, processor }
    }

    /// Insert an active connection and store its tokens through the vault.
    pub async fn connect(&self, id: &str, token_expires_at: DateTime<Utc>) -> Connection {
        let mut connection = Connection::new("op-1", "primary", "owner@example.com", Utc::now());
        connection.id = id.to_string();
        self.connections.insert(&connection).await.expect("connection inserted");
        self.vault
            .store(id, "access-1", "refresh-1", token_expires_at)
            .await
            .expect("tokens stored");
        connection
    }
}

pub fn appointment(id: &str) -> Appointment {
    let starts_at = Utc::now() + ChronoDuration::days(2);
    Appointment {
        id: id.to_string(),
        operator_id: "op-1".into(),
        title: "Consultation".into(),
        description: Some("Initial visit".into()),
        location: Some("Room 2".into()),
        starts_at,
        ends_at: starts_at + ChronoDuration::minutes(30),
        status: AppointmentStatus::Scheduled,
        updated_at: Utc::now() - ChronoDuration::minutes(5),
    }
}

pub fn event_json(id: &str, appointment_id: Option<&str>) -> serde_json::Value {
    let mut event = serde_json::json!({
        "id": id,
        "status": "confirmed",
        "summary": "Consultation",
        "description": "Initial visit",
        "location": "Room 2",
        "start": { "dateTime": "2026-03-02T09:00:00Z" },
        "end": { "dateTime": "2026-03-02T09:30:00Z" },
        "updated": Utc::now().to_rfc3339(),
    });
    if let Some(appointment_id) = appointment_id {
        event["extendedProperties"] =
            serde_json::json!({ "private": { "appointmentId": appointment_id } });
    }
    event
}
