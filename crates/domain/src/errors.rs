//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for calsync
///
/// Variants fall in three classes: fatal to the connection
/// (`CredentialRevoked`, `CalendarDeleted`), transient (`ProviderUnavailable`,
/// `RateLimitExceeded`, `Timeout`) and everything else.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum CalSyncError {
    #[error("Credential revoked: {0}")]
    CredentialRevoked(String),

    #[error("Calendar deleted: {0}")]
    CalendarDeleted(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Sync token expired: {0}")]
    SyncTokenExpired(String),

    #[error("Mapping inconsistent: {0}")]
    MappingInconsistent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CalSyncError {
    /// Errors worth another attempt through the retry queue.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::RateLimitExceeded(_) | Self::Timeout(_)
        )
    }

    /// Errors after which the connection must be deactivated and never
    /// retried.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(self, Self::CredentialRevoked(_) | Self::CalendarDeleted(_))
    }

    /// Stable machine-readable code, stored in sync log rows and as the
    /// connection's deactivation reason.
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialRevoked(_) => "credential_revoked",
            Self::CalendarDeleted(_) => "calendar_deleted",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::RateLimitExceeded(_) => "rate_limit_exceeded",
            Self::Timeout(_) => "timeout",
            Self::SyncTokenExpired(_) => "sync_token_expired",
            Self::MappingInconsistent(_) => "mapping_inconsistent",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Security(_) => "security",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Internal(_) => "internal",
        }
    }

    /// Operator-facing category text. Never contains provider payloads.
    pub fn user_message(&self) -> &'static str {
        user_message_for_code(self.code())
    }
}

/// Translate a stored error code into the category shown on the dashboard.
pub fn user_message_for_code(code: &str) -> &'static str {
    match code {
        "credential_revoked" => "Calendar access was revoked. Please reconnect your calendar.",
        "calendar_deleted" => "The connected calendar no longer exists. Please reconnect.",
        "provider_unavailable" | "timeout" => {
            "Google Calendar is temporarily unavailable. Changes will be retried automatically."
        }
        "rate_limit_exceeded" => {
            "Too many calendar changes at once. Changes will be retried automatically."
        }
        "mapping_inconsistent" => "An appointment could not be matched to its calendar event.",
        "disconnected" => "The calendar was disconnected.",
        _ => "Calendar sync encountered an unexpected problem.",
    }
}

/// Result type alias for calsync operations
pub type Result<T> = std::result::Result<T, CalSyncError>;
