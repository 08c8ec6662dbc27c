//! Periodic jobs: channel renewal and the retry sweep

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::{ChannelRenewalService, RetryDrain};
use calsync_domain::Result;
use tracing::info;

use super::cron_scheduler::ScheduledJob;

/// Replaces push channels nearing expiry.
pub struct RenewalJob {
    renewal: Arc<ChannelRenewalService>,
}

impl RenewalJob {
    pub fn new(renewal: Arc<ChannelRenewalService>) -> Self {
        Self { renewal }
    }
}

#[async_trait]
impl ScheduledJob for RenewalJob {
    fn name(&self) -> &'static str {
        "channel_renewal"
    }

    async fn run(&self) -> Result<()> {
        self.renewal.run_once().await.map(|_| ())
    }
}

/// Re-runs due retry items.
pub struct RetryDrainJob {
    drain: Arc<RetryDrain>,
}

impl RetryDrainJob {
    pub fn new(drain: Arc<RetryDrain>) -> Self {
        Self { drain }
    }
}

#[async_trait]
impl ScheduledJob for RetryDrainJob {
    fn name(&self) -> &'static str {
        "retry_drain"
    }

    async fn run(&self) -> Result<()> {
        let summary = self.drain.run_once().await?;
        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                succeeded = summary.succeeded,
                rescheduled = summary.rescheduled,
                permanently_failed = summary.permanently_failed,
                "retry sweep finished"
            );
        }
        Ok(())
    }
}
