//! Calendar connection owned by a business operator

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One operator's link to their primary Google Calendar.
///
/// Tokens are held encrypted; only the credential vault decrypts them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub operator_id: String,
    pub access_token_encrypted: String,
    pub refresh_token_encrypted: String,
    pub token_expires_at: DateTime<Utc>,
    /// Bumped on every token write; refreshes update conditionally on it.
    pub token_version: i64,
    pub calendar_id: String,
    pub account_email: String,
    pub is_active: bool,
    pub deactivation_reason: Option<String>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    /// Incremental `events.list` watermark.
    pub sync_token: Option<String>,
    pub webhook_channel_id: Option<String>,
    pub webhook_resource_id: Option<String>,
    pub webhook_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Build a fresh, active connection with no channel yet.
    pub fn new(
        operator_id: impl Into<String>,
        calendar_id: impl Into<String>,
        account_email: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: super::new_id(),
            operator_id: operator_id.into(),
            access_token_encrypted: String::new(),
            refresh_token_encrypted: String::new(),
            token_expires_at: now,
            token_version: 0,
            calendar_id: calendar_id.into(),
            account_email: account_email.into(),
            is_active: true,
            deactivation_reason: None,
            last_full_sync_at: None,
            sync_token: None,
            webhook_channel_id: None,
            webhook_resource_id: None,
            webhook_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The stored push channel, if all three channel fields are present.
    pub fn channel(&self) -> Option<WebhookChannel> {
        match (&self.webhook_channel_id, &self.webhook_resource_id, self.webhook_expires_at) {
            (Some(channel_id), Some(resource_id), Some(expires_at)) => Some(WebhookChannel {
                channel_id: channel_id.clone(),
                resource_id: resource_id.clone(),
                expires_at,
            }),
            _ => None,
        }
    }

    /// True when there is no channel or it expires within `threshold`.
    pub fn channel_needs_renewal(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.channel().map_or(true, |channel| channel.expires_at <= now + threshold)
    }

    /// True when a notification's identifiers match the stored channel.
    pub fn owns_channel(&self, channel_id: &str, resource_id: &str) -> bool {
        self.webhook_channel_id.as_deref() == Some(channel_id)
            && self.webhook_resource_id.as_deref() == Some(resource_id)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("operator_id", &self.operator_id)
            .field("access_token_encrypted", &"[REDACTED]")
            .field("refresh_token_encrypted", &"[REDACTED]")
            .field("token_expires_at", &self.token_expires_at)
            .field("token_version", &self.token_version)
            .field("calendar_id", &self.calendar_id)
            .field("is_active", &self.is_active)
            .field("deactivation_reason", &self.deactivation_reason)
            .field("webhook_channel_id", &self.webhook_channel_id)
            .field("webhook_expires_at", &self.webhook_expires_at)
            .finish_non_exhaustive()
    }
}

/// Provider-side push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Decrypted OAuth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
