use std::sync::Arc;

use calsync_domain::{Result, ResourceState, RetryQueueItem, WebhookNotification};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::retry::RetryQueue;
use crate::sync::ports::{ConnectionRepository, DispatchError, SyncDispatcher, SyncJob};

/// Deactivation reason recorded when the watched calendar disappears.
pub const CALENDAR_DELETED_REASON: &str = "calendar_deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownChannel,
    ResourceMismatch,
    TokenMismatch,
}

/// What happened to a push notification. Every variant is acknowledged
/// with a 2xx so the provider does not redeliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressDecision {
    Handshake,
    /// Handed to the sync workers.
    Dispatched,
    /// Workers saturated; queued for the next retry sweep.
    Queued,
    CalendarDeleted,
    Duplicate,
    Ignored(IgnoreReason),
}

/// Validates push notifications and hands work to the sync workers without
/// waiting on the provider.
pub struct WebhookIngress {
    connections: Arc<dyn ConnectionRepository>,
    dispatcher: Arc<dyn SyncDispatcher>,
    retry_queue: Arc<RetryQueue>,
    clock: Arc<dyn Clock>,
    channel_token: Option<String>,
    /// Highest message number per connection, with the channel it belongs to.
    /// A renewed channel replaces its predecessor's entry.
    last_seen: DashMap<String, (String, u64)>,
}

impl WebhookIngress {
    pub fn new(
        connections: Arc<dyn ConnectionRepository>,
        dispatcher: Arc<dyn SyncDispatcher>,
        retry_queue: Arc<RetryQueue>,
        clock: Arc<dyn Clock>,
        channel_token: Option<String>,
    ) -> Self {
        Self {
            connections,
            dispatcher,
            retry_queue,
            clock,
            channel_token,
            last_seen: DashMap::new(),
        }
    }

    #[instrument(skip(self, notification), fields(channel_id = %notification.channel_id, state = %notification.resource_state))]
    pub async fn handle(&self, notification: &WebhookNotification) -> Result<IngressDecision> {
        let Some(connection) = self.connections.find_by_channel(&notification.channel_id).await?
        else {
            debug!("notification for unknown channel ignored");
            return Ok(IngressDecision::Ignored(IgnoreReason::UnknownChannel));
        };

        if !connection.owns_channel(&notification.channel_id, &notification.resource_id) {
            warn!(connection_id = %connection.id, "notification resource id does not match channel");
            return Ok(IngressDecision::Ignored(IgnoreReason::ResourceMismatch));
        }

        if let Some(expected) = self.channel_token.as_deref() {
            if notification.channel_token.as_deref() != Some(expected) {
                warn!(connection_id = %connection.id, "notification channel token mismatch");
                return Ok(IngressDecision::Ignored(IgnoreReason::TokenMismatch));
            }
        }

        if notification.resource_state == ResourceState::Sync {
            debug!(connection_id = %connection.id, "channel handshake acknowledged");
            return Ok(IngressDecision::Handshake);
        }

        if let Some(number) = notification.message_number {
            if !self.first_delivery(&connection.id, &notification.channel_id, number) {
                debug!(connection_id = %connection.id, message_number = number, "duplicate notification");
                return Ok(IngressDecision::Duplicate);
            }
        }

        match notification.resource_state {
            ResourceState::NotExists => {
                warn!(connection_id = %connection.id, "watched calendar no longer exists; deactivating");
                self.connections.update_channel(&connection.id, None).await?;
                self.connections.deactivate(&connection.id, CALENDAR_DELETED_REASON).await?;
                self.last_seen.remove(&connection.id);
                Ok(IngressDecision::CalendarDeleted)
            }
            ResourceState::Exists | ResourceState::Sync => {
                let job = SyncJob::ConnectionChanged { connection_id: connection.id.clone() };
                match self.dispatcher.try_dispatch(job) {
                    Ok(()) => Ok(IngressDecision::Dispatched),
                    Err(DispatchError::Saturated(job) | DispatchError::Closed(job)) => {
                        info!(connection_id = %job.connection_id(), "sync workers unavailable; queueing change");
                        let item =
                            RetryQueueItem::connection_changes(job.connection_id(), self.clock.now())
                                .with_error("sync workers unavailable");
                        self.retry_queue.enqueue_immediate(item).await?;
                        Ok(IngressDecision::Queued)
                    }
                }
            }
        }
    }

    /// Number of connections with dedup state.
    pub fn tracked_connections(&self) -> usize {
        self.last_seen.len()
    }

    /// Record `number` for the connection's channel; `false` if it was
    /// already seen on that channel.
    fn first_delivery(&self, connection_id: &str, channel_id: &str, number: u64) -> bool {
        let mut last = self
            .last_seen
            .entry(connection_id.to_string())
            .or_insert_with(|| (channel_id.to_string(), 0));
        let (seen_channel, seen_number) = &mut *last;
        if seen_channel.as_str() != channel_id {
            *seen_channel = channel_id.to_string();
            *seen_number = 0;
        }
        if number <= *seen_number && *seen_number != 0 {
            return false;
        }
        *seen_number = number;
        true
    }
}
