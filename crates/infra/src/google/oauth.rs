//! OAuth refresh-token grant against Google's token endpoint

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use calsync_domain::{CalSyncError, GoogleConfig, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

/// Tokens returned by a successful refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Google only rotates the refresh token occasionally.
    pub refresh_token: Option<String>,
    pub expires_in: i64,
}

impl fmt::Debug for RefreshedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshedToken")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// `CredentialRevoked` for `invalid_grant`, `ProviderUnavailable` or
    /// `Timeout` for provider or network trouble.
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken>;
}

/// Form-encoded `grant_type=refresh_token` client.
pub struct GoogleTokenRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl fmt::Debug for GoogleTokenRefresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GoogleTokenRefresher")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

impl GoogleTokenRefresher {
    pub fn new(config: &GoogleConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalSyncError::Config(format!("failed to build OAuth client: {e}")))?;

        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl TokenRefresher for GoogleTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CalSyncError::Timeout("token refresh timed out".into())
                } else {
                    CalSyncError::ProviderUnavailable(format!("token refresh request failed: {e}"))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            let body: GoogleTokenResponse = response.json().await.map_err(|e| {
                CalSyncError::ProviderUnavailable(format!("failed to parse token response: {e}"))
            })?;
            debug!(expires_in = body.expires_in, "access token refreshed");
            return Ok(RefreshedToken {
                access_token: body.access_token,
                refresh_token: body.refresh_token,
                expires_in: body.expires_in,
            });
        }

        let error_text = response.text().await.unwrap_or_default();
        let error_code = serde_json::from_str::<GoogleTokenError>(&error_text)
            .map(|body| body.error)
            .unwrap_or_default();
        warn!(status = status.as_u16(), error = %error_code, "token refresh rejected");

        Err(classify_refresh_failure(status, &error_code))
    }
}

fn classify_refresh_failure(status: StatusCode, error_code: &str) -> CalSyncError {
    if error_code == "invalid_grant" {
        return CalSyncError::CredentialRevoked("refresh token rejected (invalid_grant)".into());
    }
    match status.as_u16() {
        429 => CalSyncError::RateLimitExceeded("token endpoint throttled".into()),
        500..=599 => CalSyncError::ProviderUnavailable(format!("token endpoint returned {status}")),
        401 | 403 => CalSyncError::CredentialRevoked(format!("token refresh rejected ({status})")),
        _ => CalSyncError::InvalidInput(format!("token refresh failed ({status}): {error_code}")),
    }
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenError {
    error: String,
}
