use std::sync::Arc;

use calsync_domain::{CalSyncError, Result, WebhookChannel};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::calendar_ports::CalendarApi;
use crate::clock::Clock;
use crate::sync::ports::ConnectionRepository;

/// Registers and tears down push channels for connections.
pub struct WebhookRegistrationService {
    connections: Arc<dyn ConnectionRepository>,
    calendar: Arc<dyn CalendarApi>,
    clock: Arc<dyn Clock>,
    callback_url: String,
    channel_token: Option<String>,
    renewal_threshold: chrono::Duration,
}

impl WebhookRegistrationService {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        calendar: Arc<dyn CalendarApi>,
        clock: Arc<dyn Clock>,
        callback_url: impl Into<String>,
        channel_token: Option<String>,
        renewal_threshold: chrono::Duration,
    ) -> Self {
        Self {
            connections,
            calendar,
            clock,
            callback_url: callback_url.into(),
            channel_token,
            renewal_threshold,
        }
    }

    /// Open a new channel for the connection's calendar and store it.
    ///
    /// A revoked credential or deleted calendar deactivates the connection.
    #[instrument(skip(self))]
    pub async fn register(&self, connection_id: &str) -> Result<WebhookChannel> {
        let connection = self
            .connections
            .find(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;
        if !connection.is_active {
            return Err(CalSyncError::InvalidInput(format!(
                "connection {connection_id} is inactive"
            )));
        }

        let channel_id = Uuid::new_v4().to_string();
        let channel = match self
            .calendar
            .watch_events(
                &connection,
                &channel_id,
                &self.callback_url,
                self.channel_token.as_deref(),
            )
            .await
        {
            Ok(channel) => channel,
            Err(err) => {
                if err.is_fatal_to_connection() {
                    warn!(%connection_id, error = %err, "channel registration hit a fatal error; deactivating");
                    self.connections.deactivate(connection_id, err.code()).await?;
                }
                return Err(err);
            }
        };

        self.connections.update_channel(connection_id, Some(&channel)).await?;
        info!(
            %connection_id,
            channel_id = %channel.channel_id,
            expires_at = %channel.expires_at,
            "push channel registered"
        );
        Ok(channel)
    }

    /// Stop the connection's channel and clear it locally.
    ///
    /// The stored channel is cleared even when the provider call fails; a
    /// channel the provider no longer knows is not an error.
    #[instrument(skip(self))]
    pub async fn stop(&self, connection_id: &str) -> Result<()> {
        let connection = self
            .connections
            .find(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;
        let Some(channel) = connection.channel() else {
            return Ok(());
        };

        let stopped = self
            .calendar
            .stop_channel(&connection, &channel.channel_id, &channel.resource_id)
            .await;
        self.connections.update_channel(connection_id, None).await?;

        match stopped {
            Ok(()) | Err(CalSyncError::NotFound(_)) => {
                info!(%connection_id, channel_id = %channel.channel_id, "push channel stopped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Register a channel unless a live one outlasts the renewal threshold.
    pub async fn ensure(&self, connection_id: &str) -> Result<Option<WebhookChannel>> {
        let connection = self
            .connections
            .find(connection_id)
            .await?
            .ok_or_else(|| CalSyncError::NotFound(format!("connection {connection_id}")))?;
        if !connection.channel_needs_renewal(self.clock.now(), self.renewal_threshold) {
            return Ok(None);
        }
        self.register(connection_id).await.map(Some)
    }
}
