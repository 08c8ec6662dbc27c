use std::sync::Arc;

use calsync_domain::{RetryDisposition, RetryQueueItem, RetryStatus, Result};
use tracing::{info, warn};

use super::{to_chrono, RetrySchedule};
use crate::clock::Clock;
use crate::sync::ports::RetryQueueRepository;

/// Retry queue state machine over a [`RetryQueueRepository`].
pub struct RetryQueue {
    repository: Arc<dyn RetryQueueRepository>,
    schedule: RetrySchedule,
    clock: Arc<dyn Clock>,
}

impl RetryQueue {
    pub fn new(
        repository: Arc<dyn RetryQueueRepository>,
        schedule: RetrySchedule,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repository, schedule, clock }
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.schedule
    }

    /// Queue a failed operation for its first re-try after the first tier.
    pub async fn enqueue(&self, item: RetryQueueItem) -> Result<RetryQueueItem> {
        let now = self.clock.now();
        let first_delay = self.schedule.delay_for(0).unwrap_or_default();
        let item = item.due_at(now + to_chrono(first_delay));
        let stored = self.repository.upsert_pending(&item).await?;

        info!(
            retry_id = %stored.id,
            connection_id = %stored.connection_id,
            kind = %stored.kind,
            next_retry_at = %stored.next_retry_at,
            "sync operation queued for retry"
        );
        Ok(stored)
    }

    /// Queue work that could not be dispatched, eligible on the next sweep.
    pub async fn enqueue_immediate(&self, item: RetryQueueItem) -> Result<RetryQueueItem> {
        let item = item.due_at(self.clock.now());
        self.repository.upsert_pending(&item).await
    }

    pub async fn due_items(&self, limit: usize) -> Result<Vec<RetryQueueItem>> {
        self.repository.due(self.clock.now(), limit).await
    }

    pub async fn mark_succeeded(&self, item: &RetryQueueItem) -> Result<()> {
        self.repository.delete(&item.id).await?;
        info!(
            retry_id = %item.id,
            connection_id = %item.connection_id,
            attempts = item.attempt_count + 1,
            "retried sync operation succeeded"
        );
        Ok(())
    }

    /// Record a failed re-try: advance to the next tier or fail permanently.
    pub async fn mark_failed(
        &self,
        item: &RetryQueueItem,
        error: &str,
    ) -> Result<RetryDisposition> {
        let now = self.clock.now();
        let mut updated = item.clone();
        updated.attempt_count += 1;
        updated.last_error = Some(error.to_string());
        updated.updated_at = now;

        let disposition = match self.schedule.delay_for(updated.attempt_count) {
            Some(delay) => {
                updated.next_retry_at = now + to_chrono(delay);
                RetryDisposition::Rescheduled {
                    attempt: updated.attempt_count,
                    next_retry_at: updated.next_retry_at,
                }
            }
            None => {
                updated.status = RetryStatus::FailedPermanently;
                RetryDisposition::PermanentlyFailed { attempts: updated.attempt_count }
            }
        };

        self.repository.update(&updated).await?;
        if let RetryDisposition::PermanentlyFailed { attempts } = disposition {
            warn!(
                retry_id = %item.id,
                connection_id = %item.connection_id,
                attempts,
                error,
                "sync operation exhausted retry tiers"
            );
        }
        Ok(disposition)
    }

    /// Give up on an item without consuming the remaining tiers.
    pub async fn mark_permanently_failed(
        &self,
        item: &RetryQueueItem,
        error: &str,
    ) -> Result<RetryDisposition> {
        let mut updated = item.clone();
        updated.attempt_count += 1;
        updated.last_error = Some(error.to_string());
        updated.status = RetryStatus::FailedPermanently;
        updated.updated_at = self.clock.now();
        self.repository.update(&updated).await?;

        warn!(retry_id = %item.id, connection_id = %item.connection_id, error, "sync operation abandoned");
        Ok(RetryDisposition::PermanentlyFailed { attempts: updated.attempt_count })
    }
}
