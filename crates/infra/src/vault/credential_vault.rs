//! Credential vault over the connection repository
//!
//! Tokens live encrypted on the connection row. Refresh-and-persist runs under
//! a per-connection lock and writes conditionally on `token_version`, so two
//! processes refreshing at once keep exactly one winner's tokens.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{Clock, ConnectionRepository, CredentialVault, KeyedLocks};
use calsync_domain::{CalSyncError, Connection, Result, TokenPair};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use super::cipher::TokenCipher;
use crate::google::oauth::TokenRefresher;

const DEFAULT_REFRESH_MARGIN_SECS: i64 = 300;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_STORE_ATTEMPTS: usize = 3;

/// AES-GCM encrypted token storage with transparent refresh.
pub struct EncryptedCredentialVault {
    connections: Arc<dyn ConnectionRepository>,
    cipher: Arc<TokenCipher>,
    refresher: Arc<dyn TokenRefresher>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
    refresh_margin: chrono::Duration,
    lock_timeout: Duration,
}

impl EncryptedCredentialVault {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        cipher: Arc<TokenCipher>,
        refresher: Arc<dyn TokenRefresher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            connections,
            cipher,
            refresher,
            clock,
            locks: KeyedLocks::new(),
            refresh_margin: chrono::Duration::seconds(DEFAULT_REFRESH_MARGIN_SECS),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Refresh tokens expiring within `margin`.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin =
            chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::seconds(0));
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    async fn load_active(&self, connection_id: &str) -> Result<Connection> {
        let connection = self
            .connections
            .find(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;

        if !connection.is_active {
            return Err(CalSyncError::CredentialRevoked(format!(
                "connection {connection_id} is inactive"
            )));
        }
        Ok(connection)
    }

    fn is_fresh(&self, connection: &Connection) -> bool {
        connection.token_expires_at > self.clock.now() + self.refresh_margin
    }

    /// Decrypt one stored token; a value that no longer decrypts revokes the
    /// connection.
    async fn decrypt(&self, connection_id: &str, stored: &str) -> Result<String> {
        match self.cipher.decrypt(stored) {
            Ok(plaintext) => Ok(plaintext.as_str().to_owned()),
            Err(err) => {
                warn!(connection_id, error = %err, "stored token failed to decrypt");
                self.connections.deactivate(connection_id, "credential_revoked").await?;
                Err(CalSyncError::CredentialRevoked("stored credentials are unreadable".into()))
            }
        }
    }

    /// Refresh under the connection's lock.
    ///
    /// With `observed_version` set the refresh is forced, unless another
    /// holder already moved the version past what the caller saw.
    async fn refresh_locked(
        &self,
        connection_id: &str,
        observed_version: Option<i64>,
    ) -> Result<String> {
        let _guard =
            self.locks.acquire(&format!("credentials:{connection_id}"), self.lock_timeout).await?;

        let connection = self.load_active(connection_id).await?;
        let already_refreshed = match observed_version {
            Some(version) => connection.token_version != version,
            None => self.is_fresh(&connection),
        };
        if already_refreshed {
            debug!(connection_id, "token refreshed by another holder");
            return self.decrypt(connection_id, &connection.access_token_encrypted).await;
        }

        let refresh_token = self.decrypt(connection_id, &connection.refresh_token_encrypted).await?;
        let refreshed = match self.refresher.refresh(&refresh_token).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                if err.is_fatal_to_connection() {
                    warn!(connection_id, code = err.code(), "refresh rejected, deactivating");
                    self.connections.deactivate(connection_id, err.code()).await?;
                }
                return Err(err);
            }
        };

        let expires_at = self.clock.now() + chrono::Duration::seconds(refreshed.expires_in);
        let new_refresh = refreshed.refresh_token.as_deref().unwrap_or(&refresh_token);
        let won = self
            .connections
            .update_tokens(
                connection_id,
                &self.cipher.encrypt(&refreshed.access_token)?,
                &self.cipher.encrypt(new_refresh)?,
                expires_at,
                connection.token_version,
            )
            .await?;

        if won {
            info!(connection_id, %expires_at, "access token refreshed");
            return Ok(refreshed.access_token);
        }

        debug!(connection_id, "lost token write race, using winner's token");
        let winner = self.load_active(connection_id).await?;
        self.decrypt(connection_id, &winner.access_token_encrypted).await
    }
}

#[async_trait]
impl CredentialVault for EncryptedCredentialVault {
    #[instrument(skip(self, access_token, refresh_token))]
    async fn store(
        &self,
        connection_id: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let _guard =
            self.locks.acquire(&format!("credentials:{connection_id}"), self.lock_timeout).await?;

        let access = self.cipher.encrypt(access_token)?;
        let refresh = self.cipher.encrypt(refresh_token)?;

        for _ in 0..MAX_STORE_ATTEMPTS {
            let connection = self
                .connections
                .find(connection_id)
                .await?
                .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;

            if self
                .connections
                .update_tokens(connection_id, &access, &refresh, expires_at, connection.token_version)
                .await?
            {
                return Ok(());
            }
        }

        Err(CalSyncError::Database(format!(
            "tokens for {connection_id} kept changing during store"
        )))
    }

    async fn retrieve(&self, connection_id: &str) -> Result<TokenPair> {
        let connection = self.load_active(connection_id).await?;
        Ok(TokenPair {
            access_token: self.decrypt(connection_id, &connection.access_token_encrypted).await?,
            refresh_token: self.decrypt(connection_id, &connection.refresh_token_encrypted).await?,
            expires_at: connection.token_expires_at,
        })
    }

    #[instrument(skip(self))]
    async fn get_valid_access_token(&self, connection_id: &str) -> Result<String> {
        let connection = self.load_active(connection_id).await?;
        if self.is_fresh(&connection) {
            return self.decrypt(connection_id, &connection.access_token_encrypted).await;
        }
        self.refresh_locked(connection_id, None).await
    }

    #[instrument(skip(self))]
    async fn force_refresh(&self, connection_id: &str) -> Result<String> {
        let connection = self.load_active(connection_id).await?;
        self.refresh_locked(connection_id, Some(connection.token_version)).await
    }
}
