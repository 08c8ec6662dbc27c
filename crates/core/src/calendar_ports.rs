//! Calendar provider and credential port interfaces

use async_trait::async_trait;
use calsync_domain::{
    Connection, EventChanges, EventPayload, EventQuery, ExternalEvent, Result, TokenPair,
    WebhookChannel,
};
use chrono::{DateTime, Utc};

/// Rate-limited access to the external calendar.
///
/// Implementations pace requests per connection, retry throttling and 5xx
/// responses with capped backoff, and surface `RateLimitExceeded` or
/// `ProviderUnavailable` once their attempt ceiling is reached.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn create_event(
        &self,
        connection: &Connection,
        payload: &EventPayload,
    ) -> Result<ExternalEvent>;

    /// Fails with `NotFound` when the event no longer exists.
    async fn update_event(
        &self,
        connection: &Connection,
        event_id: &str,
        payload: &EventPayload,
    ) -> Result<ExternalEvent>;

    /// Succeeds when the event is already gone.
    async fn delete_event(&self, connection: &Connection, event_id: &str) -> Result<()>;

    /// `None` when the provider reports the event missing.
    async fn get_event(
        &self,
        connection: &Connection,
        event_id: &str,
    ) -> Result<Option<ExternalEvent>>;

    /// All pages of changed events. `SyncTokenExpired` means the caller must
    /// fall back to a window query.
    async fn list_events_since(
        &self,
        connection: &Connection,
        query: &EventQuery,
    ) -> Result<EventChanges>;

    async fn watch_events(
        &self,
        connection: &Connection,
        channel_id: &str,
        callback_url: &str,
        channel_token: Option<&str>,
    ) -> Result<WebhookChannel>;

    async fn stop_channel(
        &self,
        connection: &Connection,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()>;

    /// Calls counted against the connection's current quota window.
    fn calls_in_window(&self, _connection_id: &str) -> u64 {
        0
    }
}

/// Encrypted OAuth token storage with transparent refresh.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn store(
        &self,
        connection_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn retrieve(&self, connection_id: &str) -> Result<TokenPair>;

    /// Access token valid for at least the configured safety margin,
    /// refreshing and persisting first when needed.
    async fn get_valid_access_token(&self, connection_id: &str) -> Result<String>;

    /// Refresh regardless of the stored expiry (after a provider 401).
    async fn force_refresh(&self, connection_id: &str) -> Result<String>;
}
