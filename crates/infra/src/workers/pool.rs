//! Bounded pool of background sync workers.
//!
//! Webhook ingress and the appointment push endpoint hand [`SyncJob`]s to the
//! pool through [`SyncDispatcher::try_dispatch`], which never waits: a full
//! queue is reported back so the caller can fall back to the retry queue.
//! A single receive loop takes jobs off a bounded `mpsc` channel and spawns
//! each under a semaphore permit, so at most `worker_count` jobs run at once.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use calsync_core::{DispatchError, SyncDispatcher, SyncJob, SyncProcessor};
use calsync_domain::{CalSyncError, Result, SyncConfig};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Executes one job. Failures are the handler's to log or queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: SyncJob);
}

#[async_trait]
impl JobHandler for SyncProcessor {
    async fn handle(&self, job: SyncJob) {
        self.handle_job(job).await;
    }
}

/// Configuration for [`SyncWorkerPool`].
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Jobs running at the same time.
    pub worker_count: usize,
    /// Jobs waiting for a worker before dispatch reports saturation.
    pub queue_capacity: usize,
    /// How long shutdown waits for in-flight jobs before aborting them.
    pub drain_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { worker_count: 4, queue_capacity: 256, drain_timeout: Duration::from_secs(10) }
    }
}

impl From<&SyncConfig> for WorkerPoolConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            worker_count: config.worker_count,
            queue_capacity: config.queue_capacity,
            ..Self::default()
        }
    }
}

/// Non-blocking sender side of the pool.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    sender: mpsc::Sender<SyncJob>,
}

impl SyncDispatcher for ChannelDispatcher {
    fn try_dispatch(&self, job: SyncJob) -> std::result::Result<(), DispatchError> {
        self.sender.try_send(job).map_err(|err| match err {
            mpsc::error::TrySendError::Full(job) => DispatchError::Saturated(job),
            mpsc::error::TrySendError::Closed(job) => DispatchError::Closed(job),
        })
    }
}

/// Background worker pool with explicit lifecycle management.
pub struct SyncWorkerPool {
    dispatcher: ChannelDispatcher,
    cancellation: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
}

impl SyncWorkerPool {
    /// Spawn the receive loop. Must be called inside a Tokio runtime.
    pub fn start(handler: Arc<dyn JobHandler>, config: WorkerPoolConfig) -> Self {
        Self::start_with_cancellation(handler, config, CancellationToken::new())
    }

    /// Like [`start`](Self::start), stopping when `cancellation` fires.
    pub fn start_with_cancellation(
        handler: Arc<dyn JobHandler>,
        config: WorkerPoolConfig,
        cancellation: CancellationToken,
    ) -> Self {
        let worker_count = config.worker_count.max(1);
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(worker_count));

        let handle = tokio::spawn(run_loop(
            receiver,
            handler,
            semaphore,
            cancellation.clone(),
            config.drain_timeout,
        ));

        info!(worker_count, queue_capacity = config.queue_capacity, "sync worker pool started");
        Self { dispatcher: ChannelDispatcher { sender }, cancellation, loop_handle: Some(handle) }
    }

    /// Handle for enqueueing jobs.
    pub fn dispatcher(&self) -> ChannelDispatcher {
        self.dispatcher.clone()
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stop accepting jobs, wait for in-flight ones and join the loop.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancellation.cancel();
        if let Some(handle) = self.loop_handle.take() {
            handle.await.map_err(|err| {
                CalSyncError::Internal(format!("sync worker loop failed: {err}"))
            })?;
        }
        info!("sync worker pool stopped");
        Ok(())
    }
}

impl Drop for SyncWorkerPool {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("SyncWorkerPool dropped while running; cancelling workers");
            self.cancellation.cancel();
        }
    }
}

async fn run_loop(
    mut receiver: mpsc::Receiver<SyncJob>,
    handler: Arc<dyn JobHandler>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    drain_timeout: Duration,
) {
    let mut tasks = JoinSet::new();

    loop {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let job = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        debug!(connection_id = job.connection_id(), "sync job started");
        let handler = Arc::clone(&handler);
        tasks.spawn(async move {
            let _permit = permit;
            handler.handle(job).await;
        });

        while let Some(finished) = tasks.try_join_next() {
            log_join(finished);
        }
    }

    receiver.close();
    let mut dropped = 0usize;
    while receiver.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "queued sync jobs discarded at shutdown");
    }

    let drained = tokio::time::timeout(drain_timeout, async {
        while let Some(finished) = tasks.join_next().await {
            log_join(finished);
        }
    })
    .await;
    if drained.is_err() {
        warn!(
            in_flight = tasks.len(),
            timeout_secs = drain_timeout.as_secs(),
            "in-flight sync jobs aborted at shutdown"
        );
        tasks.abort_all();
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(error = %err, "sync job panicked");
        }
    }
}
