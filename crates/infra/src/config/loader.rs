//! Configuration loader
//!
//! Loads the service configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. Reads `.env` into the environment when present
//! 2. Attempts to build the configuration from `CALSYNC_*` variables
//! 3. If a required variable is missing, falls back to a config file
//! 4. Probes multiple paths for config files (TOML or JSON)
//! 5. Validates the result with [`Config::validate`]
//!
//! ## Environment Variables
//! Required:
//! - `CALSYNC_DB_PATH`: Database file path
//! - `CALSYNC_DB_ENCRYPTION_KEY`: SQLCipher key
//! - `CALSYNC_GOOGLE_CLIENT_ID`, `CALSYNC_GOOGLE_CLIENT_SECRET`: OAuth client
//! - `CALSYNC_WEBHOOK_CALLBACK_URL`: Public URL of the webhook endpoint
//! - `CALSYNC_CRON_SECRET`: Shared secret for cron and admin endpoints
//! - `CALSYNC_VAULT_TOKEN_KEY`: Base64 AES-256 key for OAuth tokens
//!
//! Optional (defaults apply when unset):
//! - `CALSYNC_DB_POOL_SIZE`, `CALSYNC_BIND_ADDRESS`
//! - `CALSYNC_GOOGLE_API_BASE_URL`, `CALSYNC_GOOGLE_TOKEN_URL`,
//!   `CALSYNC_CHANNEL_TOKEN`
//! - `CALSYNC_SYNC_WORKER_COUNT`, `CALSYNC_SYNC_QUEUE_CAPACITY`,
//!   `CALSYNC_SYNC_MIN_REQUEST_SPACING_MS`, `CALSYNC_SYNC_MAX_ATTEMPTS`,
//!   `CALSYNC_SYNC_REQUEST_TIMEOUT_SECS`, `CALSYNC_SYNC_QUOTA_PER_WINDOW`
//! - `CALSYNC_RENEWAL_CRON`, `CALSYNC_RENEWAL_THRESHOLD_HOURS`
//! - `CALSYNC_RETRY_CRON`, `CALSYNC_RETRY_TIERS_SECS` (comma separated)
//!
//! ## File Locations
//! `config.toml`, `calsync.toml` and `config.json` are searched for in the working
//! directory and up to two parents, then next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use calsync_domain::{
    CalSyncError, Config, DatabaseConfig, GoogleConfig, RenewalConfig, Result, RetryConfig,
    ServerConfig, SyncConfig, VaultConfig,
};

const CONFIG_FILE_NAMES: [&str; 3] = ["config.toml", "calsync.toml", "config.json"];

/// Load and validate configuration with automatic fallback strategy
///
/// # Errors
/// Returns `CalSyncError::Config` if no source yields a complete
/// configuration or the result fails validation.
pub fn load() -> Result<Config> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Loaded .env file");
    }

    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = %e, "Environment incomplete, trying config file");
            load_from_file(None)?
        }
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from `CALSYNC_*` environment variables
///
/// # Errors
/// Returns `CalSyncError::Config` if a required variable is missing or a
/// numeric variable does not parse.
pub fn load_from_env() -> Result<Config> {
    let database = DatabaseConfig {
        path: PathBuf::from(env_var("CALSYNC_DB_PATH")?),
        pool_size: env_parse_or("CALSYNC_DB_POOL_SIZE", 8)?,
        encryption_key: Some(env_var("CALSYNC_DB_ENCRYPTION_KEY")?),
    };

    let mut google = GoogleConfig {
        api_base_url: calsync_domain::constants::GOOGLE_CALENDAR_API_BASE.to_string(),
        token_url: calsync_domain::constants::GOOGLE_TOKEN_URL.to_string(),
        client_id: env_var("CALSYNC_GOOGLE_CLIENT_ID")?,
        client_secret: env_var("CALSYNC_GOOGLE_CLIENT_SECRET")?,
        webhook_callback_url: env_var("CALSYNC_WEBHOOK_CALLBACK_URL")?,
        channel_token: env_opt("CALSYNC_CHANNEL_TOKEN"),
    };
    if let Some(base) = env_opt("CALSYNC_GOOGLE_API_BASE_URL") {
        google.api_base_url = base;
    }
    if let Some(token_url) = env_opt("CALSYNC_GOOGLE_TOKEN_URL") {
        google.token_url = token_url;
    }

    let server = ServerConfig {
        bind_address: env_opt("CALSYNC_BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".into()),
        cron_secret: env_var("CALSYNC_CRON_SECRET")?,
    };
    let vault = VaultConfig { token_key: env_var("CALSYNC_VAULT_TOKEN_KEY")? };

    let defaults = SyncConfig::default();
    let sync = SyncConfig {
        worker_count: env_parse_or("CALSYNC_SYNC_WORKER_COUNT", defaults.worker_count)?,
        queue_capacity: env_parse_or("CALSYNC_SYNC_QUEUE_CAPACITY", defaults.queue_capacity)?,
        min_request_spacing_ms: env_parse_or(
            "CALSYNC_SYNC_MIN_REQUEST_SPACING_MS",
            defaults.min_request_spacing_ms,
        )?,
        max_attempts: env_parse_or("CALSYNC_SYNC_MAX_ATTEMPTS", defaults.max_attempts)?,
        request_timeout_secs: env_parse_or(
            "CALSYNC_SYNC_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout_secs,
        )?,
        quota_per_window: env_parse_or("CALSYNC_SYNC_QUOTA_PER_WINDOW", defaults.quota_per_window)?,
        ..defaults
    };

    let mut renewal = RenewalConfig::default();
    if let Some(cron) = env_opt("CALSYNC_RENEWAL_CRON") {
        renewal.cron_expression = cron;
    }
    renewal.threshold_hours =
        env_parse_or("CALSYNC_RENEWAL_THRESHOLD_HOURS", renewal.threshold_hours)?;

    let mut retry = RetryConfig::default();
    if let Some(cron) = env_opt("CALSYNC_RETRY_CRON") {
        retry.cron_expression = cron;
    }
    if let Some(raw) = env_opt("CALSYNC_RETRY_TIERS_SECS") {
        retry.tiers_secs = parse_tiers(&raw)?;
    }

    Ok(Config { database, google, server, vault, sync, renewal, retry })
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations via
/// [`discover_config_path`]. The format follows the file extension.
///
/// # Errors
/// Returns `CalSyncError::Config` if the file is missing, unreadable or
/// malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CalSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => discover_config_path().ok_or_else(|| {
            CalSyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CalSyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration text, choosing the format by file extension.
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CalSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn discover_config_path() -> Option<PathBuf> {
    let mut directories = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        directories.extend(cwd.ancestors().take(3).map(Path::to_path_buf));
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            directories.push(exe_dir.to_path_buf());
        }
    }

    directories
        .iter()
        .flat_map(|dir| CONFIG_FILE_NAMES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.exists())
}

fn parse_tiers(raw: &str) -> Result<Vec<u64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u64>()
                .map_err(|e| CalSyncError::Config(format!("Invalid retry tier '{part}': {e}")))
        })
        .collect()
}

/// Required environment variable.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| CalSyncError::Config(format!("Missing required environment variable: {key}")))
}

/// Optional variable; blank counts as unset.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| CalSyncError::Config(format!("Invalid value for {key}: {e}"))),
        None => Ok(default),
    }
}
