//! Cron-driven runner for periodic sync jobs.
//!
//! One [`CronScheduler`] owns one job. The monitor task is tracked through
//! its join handle, cancellation is explicit, and every lifecycle step and
//! job run is wrapped in a timeout. A run that fires while the previous one
//! is still in progress is skipped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use calsync_infra::scheduling::{
//!     CronScheduler, CronSchedulerConfig, ScheduledJob, SchedulerResult,
//! };
//!
//! struct NoopJob;
//!
//! #[async_trait]
//! impl ScheduledJob for NoopJob {
//!     fn name(&self) -> &'static str {
//!         "noop"
//!     }
//!
//!     async fn run(&self) -> calsync_domain::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> SchedulerResult<()> {
//! let mut scheduler = CronScheduler::new(
//!     CronSchedulerConfig { cron_expression: "0 */5 * * * *".into(), ..Default::default() },
//!     Arc::new(NoopJob),
//! );
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use calsync_domain::Result;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::scheduling::error::{SchedulerError, SchedulerResult};

/// A unit of periodic work.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

/// Configuration for a [`CronScheduler`].
#[derive(Debug, Clone)]
pub struct CronSchedulerConfig {
    /// Six-field cron expression, seconds first.
    pub cron_expression: String,
    /// Timeout applied to a single job execution.
    pub job_timeout: Duration,
    pub start_timeout: Duration,
    pub stop_timeout: Duration,
    /// Timeout for awaiting the monitor task join handle.
    pub join_timeout: Duration,
}

impl Default for CronSchedulerConfig {
    fn default() -> Self {
        Self {
            cron_expression: "0 * * * * *".into(), // every minute
            job_timeout: Duration::from_secs(300),
            start_timeout: Duration::from_secs(5),
            stop_timeout: Duration::from_secs(5),
            join_timeout: Duration::from_secs(5),
        }
    }
}

/// Cron scheduler with explicit lifecycle management.
pub struct CronScheduler {
    config: CronSchedulerConfig,
    job: Arc<dyn ScheduledJob>,
    scheduler: Option<JobScheduler>,
    monitor_handle: Option<JoinHandle<()>>,
    cancellation: CancellationToken,
}

impl CronScheduler {
    pub fn new(config: CronSchedulerConfig, job: Arc<dyn ScheduledJob>) -> Self {
        Self {
            config,
            job,
            scheduler: None,
            monitor_handle: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Stop when `parent` is cancelled as well as on [`stop`](Self::stop).
    pub fn with_parent_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = parent.child_token();
        self
    }

    pub fn job_name(&self) -> &'static str {
        self.job.name()
    }

    /// Register the job on a fresh scheduler and start it.
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if self.cancellation.is_cancelled() {
            self.cancellation = CancellationToken::new();
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|err| SchedulerError::CreationFailed(err.to_string()))?;
        self.register_job(&scheduler).await?;

        let start_timeout = self.config.start_timeout;
        tokio::time::timeout(start_timeout, scheduler.start())
            .await
            .map_err(|_| SchedulerError::Timeout { seconds: start_timeout.as_secs() })?
            .map_err(|err| SchedulerError::StartFailed(err.to_string()))?;

        let cancel = self.cancellation.clone();
        let name = self.job.name();
        let handle = tokio::spawn(async move {
            cancel.cancelled().await;
            debug!(job = name, "scheduler monitor cancelled");
        });

        self.scheduler = Some(scheduler);
        self.monitor_handle = Some(handle);
        info!(job = name, cron = %self.config.cron_expression, "scheduler started");
        Ok(())
    }

    /// Shut the scheduler down and wait for the monitor task.
    #[instrument(skip(self), fields(job = self.job.name()))]
    pub async fn stop(&mut self) -> SchedulerResult<()> {
        if !self.is_running() && self.scheduler.is_none() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation.cancel();

        if let Some(mut scheduler) = self.scheduler.take() {
            let stop_timeout = self.config.stop_timeout;
            tokio::time::timeout(stop_timeout, scheduler.shutdown())
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: stop_timeout.as_secs() })?
                .map_err(|err| SchedulerError::StopFailed(err.to_string()))?;
        }

        if let Some(handle) = self.monitor_handle.take() {
            let join_timeout = self.config.join_timeout;
            tokio::time::timeout(join_timeout, handle)
                .await
                .map_err(|_| SchedulerError::Timeout { seconds: join_timeout.as_secs() })?
                .map_err(|err| SchedulerError::TaskJoinFailed(err.to_string()))?;
        }

        info!(job = self.job.name(), "scheduler stopped");
        self.cancellation = CancellationToken::new();
        Ok(())
    }

    /// Returns true when the monitor task is active.
    pub fn is_running(&self) -> bool {
        self.monitor_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn register_job(&self, scheduler: &JobScheduler) -> SchedulerResult<()> {
        let job = Arc::clone(&self.job);
        let job_timeout = self.config.job_timeout;
        let in_flight = Arc::new(AtomicBool::new(false));

        let definition = Job::new_async(self.config.cron_expression.as_str(), move |_id, _lock| {
            let job = Arc::clone(&job);
            let in_flight = Arc::clone(&in_flight);

            Box::pin(async move {
                if in_flight.swap(true, Ordering::SeqCst) {
                    warn!(job = job.name(), "previous run still in progress; skipping");
                    return;
                }
                run_with_timeout(job.as_ref(), job_timeout).await;
                in_flight.store(false, Ordering::SeqCst);
            })
        })
        .map_err(|err| SchedulerError::JobRegistrationFailed(err.to_string()))?;

        let job_id = scheduler
            .add(definition)
            .await
            .map_err(|err| SchedulerError::JobRegistrationFailed(err.to_string()))?;

        debug!(job = self.job.name(), cron = %self.config.cron_expression, %job_id, "registered job");
        Ok(())
    }
}

async fn run_with_timeout(job: &dyn ScheduledJob, job_timeout: Duration) {
    let started = Instant::now();
    match tokio::time::timeout(job_timeout, job.run()).await {
        Ok(Ok(())) => {
            debug!(
                job = job.name(),
                duration_ms = started.elapsed().as_millis() as u64,
                "scheduled job finished"
            );
        }
        Ok(Err(err)) => {
            error!(job = job.name(), error = %err, "scheduled job failed");
        }
        Err(_) => {
            warn!(job = job.name(), timeout_secs = job_timeout.as_secs(), "scheduled job timed out");
        }
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        if self.is_running() {
            warn!(job = self.job.name(), "scheduler dropped while running; cancelling tasks");
            self.cancellation.cancel();
        }
    }
}
