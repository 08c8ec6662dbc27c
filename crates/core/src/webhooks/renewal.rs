use std::sync::Arc;
use std::time::Duration;

use calsync_domain::{CalSyncError, Connection, RenewalSummary, Result};
use tracing::{debug, info, instrument, warn};

use super::WebhookRegistrationService;
use crate::clock::Clock;
use crate::sync::ports::ConnectionRepository;

#[derive(Debug, Clone)]
pub struct RenewalSettings {
    /// Renew channels expiring within this window.
    pub threshold: chrono::Duration,
    /// Pause between two renewals.
    pub spacing: Duration,
    pub per_connection_timeout: Duration,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            threshold: chrono::Duration::hours(24),
            spacing: Duration::from_millis(250),
            per_connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Periodic sweep replacing push channels before they expire.
pub struct ChannelRenewalService {
    connections: Arc<dyn ConnectionRepository>,
    registration: Arc<WebhookRegistrationService>,
    clock: Arc<dyn Clock>,
    settings: RenewalSettings,
}

impl ChannelRenewalService {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        registration: Arc<WebhookRegistrationService>,
        clock: Arc<dyn Clock>,
        settings: RenewalSettings,
    ) -> Self {
        Self { connections, registration, clock, settings }
    }

    /// One renewal sweep over active connections. A failing connection
    /// never stops the sweep.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RenewalSummary> {
        let connections = self.connections.list_active().await?;
        let now = self.clock.now();
        let mut summary = RenewalSummary { total: connections.len(), ..RenewalSummary::default() };

        let mut first = true;
        for connection in &connections {
            if !connection.channel_needs_renewal(now, self.settings.threshold) {
                summary.skipped += 1;
                continue;
            }

            if !first && !self.settings.spacing.is_zero() {
                tokio::time::sleep(self.settings.spacing).await;
            }
            first = false;

            let renewal = tokio::time::timeout(
                self.settings.per_connection_timeout,
                self.renew(connection),
            )
            .await
            .unwrap_or_else(|_| {
                Err(CalSyncError::Timeout(format!(
                    "channel renewal exceeded {}s",
                    self.settings.per_connection_timeout.as_secs()
                )))
            });

            match renewal {
                Ok(()) => summary.renewed += 1,
                Err(err) => {
                    warn!(connection_id = %connection.id, error = %err, "channel renewal failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            total = summary.total,
            renewed = summary.renewed,
            failed = summary.failed,
            skipped = summary.skipped,
            "channel renewal sweep finished"
        );
        Ok(summary)
    }

    async fn renew(&self, connection: &Connection) -> Result<()> {
        if connection.channel().is_some() {
            if let Err(err) = self.registration.stop(&connection.id).await {
                debug!(connection_id = %connection.id, error = %err, "old channel not stopped; continuing");
            }
        }
        self.registration.register(&connection.id).await.map(|_| ())
    }
}
