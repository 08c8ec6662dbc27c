use std::sync::Arc;

use async_trait::async_trait;
use calsync_domain::{RetryDisposition, RetryQueueItem, Result};
use tracing::{debug, instrument, warn};

use super::RetryQueue;

/// Re-runs one queued operation.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    /// Must not enqueue new retry items itself on failure.
    async fn retry(&self, item: &RetryQueueItem) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetrySweepSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub permanently_failed: usize,
}

/// One sweep over due retry items.
pub struct RetryDrain {
    queue: Arc<RetryQueue>,
    handler: Arc<dyn RetryHandler>,
    batch_size: usize,
}

impl RetryDrain {
    pub fn new(queue: Arc<RetryQueue>, handler: Arc<dyn RetryHandler>, batch_size: usize) -> Self {
        Self { queue, handler, batch_size: batch_size.max(1) }
    }

    /// Process due items oldest first.
    ///
    /// Errors fatal to a connection skip the remaining tiers; every other
    /// error advances the item to its next tier.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<RetrySweepSummary> {
        let items = self.queue.due_items(self.batch_size).await?;
        let mut summary = RetrySweepSummary::default();

        for item in items {
            summary.processed += 1;

            match self.handler.retry(&item).await {
                Ok(()) => {
                    self.queue.mark_succeeded(&item).await?;
                    summary.succeeded += 1;
                }
                Err(err) => {
                    let message = err.to_string();
                    let disposition = if err.is_fatal_to_connection() {
                        self.queue.mark_permanently_failed(&item, &message).await?
                    } else {
                        self.queue.mark_failed(&item, &message).await?
                    };

                    match disposition {
                        RetryDisposition::Rescheduled { attempt, next_retry_at } => {
                            debug!(retry_id = %item.id, attempt, %next_retry_at, "retry rescheduled");
                            summary.rescheduled += 1;
                        }
                        RetryDisposition::PermanentlyFailed { attempts } => {
                            warn!(retry_id = %item.id, attempts, error = %message, "retry moved to permanent failures");
                            summary.permanently_failed += 1;
                        }
                    }
                }
            }
        }

        Ok(summary)
    }
}
