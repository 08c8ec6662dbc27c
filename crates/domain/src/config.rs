//! Configuration structures
//!
//! Every tunable has a serde default so a config file only needs the secrets
//! and deployment-specific URLs.

use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::constants::{GOOGLE_CALENDAR_API_BASE, GOOGLE_TOKEN_URL};
use crate::errors::{CalSyncError, Result};

/// Root configuration aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub google: GoogleConfig,
    pub server: ServerConfig,
    pub vault: VaultConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub renewal: RenewalConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Check cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let key = STANDARD
            .decode(self.vault.token_key.trim())
            .map_err(|e| CalSyncError::Config(format!("vault.token_key is not base64: {e}")))?;
        if key.len() != 32 {
            return Err(CalSyncError::Config(format!(
                "vault.token_key must decode to 32 bytes, got {}",
                key.len()
            )));
        }

        url::Url::parse(&self.google.webhook_callback_url).map_err(|e| {
            CalSyncError::Config(format!("google.webhook_callback_url is invalid: {e}"))
        })?;

        if self.retry.tiers_secs.is_empty() {
            return Err(CalSyncError::Config("retry.tiers_secs must not be empty".into()));
        }
        if self.sync.worker_count == 0 || self.sync.queue_capacity == 0 {
            return Err(CalSyncError::Config(
                "sync.worker_count and sync.queue_capacity must be positive".into(),
            ));
        }
        if self.server.cron_secret.trim().is_empty() {
            return Err(CalSyncError::Config("server.cron_secret must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// SQLCipher key.
    pub encryption_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Public URL of the webhook receipt endpoint.
    pub webhook_callback_url: String,
    /// Echoed back by Google in `X-Goog-Channel-Token`.
    #[serde(default)]
    pub channel_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Shared secret for cron and admin endpoints.
    pub cron_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Base64-encoded 256-bit AES-GCM key.
    pub token_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub min_request_spacing_ms: u64,
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub token_refresh_margin_secs: u64,
    pub lock_timeout_secs: u64,
    pub resolution_timeout_secs: u64,
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Zero disables the quota ceiling.
    pub quota_per_window: u64,
    pub quota_window_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_request_spacing_ms: 100,
            max_attempts: 5,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            request_timeout_secs: 15,
            token_refresh_margin_secs: 300,
            lock_timeout_secs: 30,
            resolution_timeout_secs: 120,
            worker_count: 4,
            queue_capacity: 256,
            quota_per_window: 600,
            quota_window_secs: 60,
        }
    }
}

impl SyncConfig {
    pub fn min_request_spacing(&self) -> Duration {
        Duration::from_millis(self.min_request_spacing_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_secs(self.resolution_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Six-field cron expression (seconds first).
    pub cron_expression: String,
    pub threshold_hours: i64,
    pub spacing_ms: u64,
    pub per_connection_timeout_secs: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 0 3 * * *".into(), // daily at 03:00 UTC
            threshold_hours: 24,
            spacing_ms: 250,
            per_connection_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub cron_expression: String,
    /// Delay before each re-try, in order.
    pub tiers_secs: Vec<u64>,
    pub batch_size: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 * * * * *".into(), // every minute
            tiers_secs: vec![60, 300, 900],
            batch_size: 50,
        }
    }
}

impl RetryConfig {
    pub fn tiers(&self) -> Vec<Duration> {
        self.tiers_secs.iter().copied().map(Duration::from_secs).collect()
    }
}

fn default_pool_size() -> u32 {
    8
}

fn default_api_base_url() -> String {
    GOOGLE_CALENDAR_API_BASE.to_string()
}

fn default_token_url() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                path: PathBuf::from("calsync.db"),
                pool_size: 4,
                encryption_key: Some("db-key".into()),
            },
            google: GoogleConfig {
                api_base_url: default_api_base_url(),
                token_url: default_token_url(),
                client_id: "client".into(),
                client_secret: "secret".into(),
                webhook_callback_url: "https://calsync.example.com/webhooks/google-calendar"
                    .into(),
                channel_token: None,
            },
            server: ServerConfig { bind_address: default_bind_address(), cron_secret: "s3".into() },
            vault: VaultConfig { token_key: STANDARD.encode([7u8; 32]) },
            sync: SyncConfig::default(),
            renewal: RenewalConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn default_tiers_are_one_five_fifteen_minutes() {
        let tiers = RetryConfig::default().tiers();
        assert_eq!(
            tiers,
            vec![Duration::from_secs(60), Duration::from_secs(300), Duration::from_secs(900)]
        );
    }

    #[test]
    fn validate_accepts_complete_config() {
        valid_config().validate().expect("config is valid");
    }

    #[test]
    fn validate_rejects_short_vault_key() {
        let mut config = valid_config();
        config.vault.token_key = STANDARD.encode([1u8; 16]);
        assert!(matches!(config.validate(), Err(CalSyncError::Config(_))));
    }

    #[test]
    fn validate_rejects_empty_tiers() {
        let mut config = valid_config();
        config.retry.tiers_secs.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn minimal_document_fills_defaults() {
        let raw = serde_json::json!({
            "database": { "path": "/var/lib/calsync/calsync.db", "encryption_key": "k" },
            "google": {
                "client_id": "id",
                "client_secret": "secret",
                "webhook_callback_url": "https://example.com/webhooks/google-calendar"
            },
            "server": { "cron_secret": "cron" },
            "vault": { "token_key": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=" }
        });

        let config: Config = serde_json::from_value(raw).expect("config parses");
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.sync.min_request_spacing_ms, 100);
        assert_eq!(config.google.api_base_url, GOOGLE_CALENDAR_API_BASE);
        assert_eq!(config.renewal.threshold_hours, 24);
        config.validate().expect("defaults validate");
    }
}
