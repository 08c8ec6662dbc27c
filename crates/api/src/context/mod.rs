//! Application context - dependency injection container
//!
//! Builds every repository, client and service from [`Config`] once, and owns
//! the lifecycles of the background workers and cron schedulers.

use std::sync::Arc;
use std::time::Duration;

use calsync_core::{
    CalendarApi, ChannelRenewalService, Clock, ConnectionRepository, CredentialVault,
    EventMappingRepository, RenewalSettings, RetryDrain, RetryQueue, RetrySchedule, SyncDispatcher,
    SyncProcessor, SyncProcessorConfig, SyncStatusService, SystemClock, WebhookIngress,
    WebhookRegistrationService,
};
use calsync_domain::{CalSyncError, Config, Result};
use calsync_infra::{
    CronScheduler, CronSchedulerConfig, DbManager, EncryptedCredentialVault, GoogleCalendarClient,
    GoogleTokenRefresher, RateLimitedHttp, RenewalJob, RetryDrainJob, SqlCipherAppointmentStore,
    SqlCipherConnectionRepository, SqlCipherEventMappingRepository, SqlCipherRetryQueueRepository,
    SqlCipherSyncLogRepository, SyncWorkerPool, TokenCipher, WorkerPoolConfig,
};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Application context - holds all services and dependencies
pub struct AppContext {
    pub config: Config,
    pub db: Arc<DbManager>,
    pub connections: Arc<dyn ConnectionRepository>,
    pub mappings: Arc<dyn EventMappingRepository>,
    pub appointments: Arc<SqlCipherAppointmentStore>,
    pub vault: Arc<dyn CredentialVault>,
    pub retry_queue: Arc<RetryQueue>,
    pub processor: Arc<SyncProcessor>,
    pub dispatcher: Arc<dyn SyncDispatcher>,
    pub ingress: Arc<WebhookIngress>,
    pub registration: Arc<WebhookRegistrationService>,
    pub renewal: Arc<ChannelRenewalService>,
    pub retry_drain: Arc<RetryDrain>,
    pub status: Arc<SyncStatusService>,

    cron_secret_digest: [u8; 32],
    shutdown: CancellationToken,
    workers: Mutex<Option<SyncWorkerPool>>,
    schedulers: Mutex<Vec<CronScheduler>>,
}

impl AppContext {
    /// Wire the application and start the sync workers.
    ///
    /// Must run inside a Tokio runtime. Schedulers are started separately
    /// with [`start_schedulers`](Self::start_schedulers).
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Initialize database with encryption
        let db = Arc::new(DbManager::from_config(&config.database)?);
        db.run_migrations()?;

        let connections: Arc<dyn ConnectionRepository> =
            Arc::new(SqlCipherConnectionRepository::new(Arc::clone(&db)).with_clock(Arc::clone(&clock)));
        let mappings: Arc<dyn EventMappingRepository> =
            Arc::new(SqlCipherEventMappingRepository::new(Arc::clone(&db)));
        let sync_log = Arc::new(SqlCipherSyncLogRepository::new(Arc::clone(&db)));
        let retry_repo = Arc::new(SqlCipherRetryQueueRepository::new(Arc::clone(&db)));
        let appointments = Arc::new(SqlCipherAppointmentStore::new(Arc::clone(&db)));

        // Credential vault with OAuth refresh
        let cipher = Arc::new(TokenCipher::from_base64(&config.vault.token_key)?);
        let refresher =
            Arc::new(GoogleTokenRefresher::new(&config.google, config.sync.request_timeout())?);
        let vault: Arc<dyn CredentialVault> = Arc::new(
            EncryptedCredentialVault::new(
                Arc::clone(&connections),
                cipher,
                refresher,
                Arc::clone(&clock),
            )
            .with_refresh_margin(Duration::from_secs(config.sync.token_refresh_margin_secs))
            .with_lock_timeout(config.sync.lock_timeout()),
        );

        // Rate-limited Google Calendar client
        let http = Arc::new(RateLimitedHttp::from_config(&config.sync)?);
        let calendar: Arc<dyn CalendarApi> = Arc::new(GoogleCalendarClient::new(
            http,
            Arc::clone(&vault),
            config.google.api_base_url.clone(),
        ));

        let retry_queue = Arc::new(RetryQueue::new(
            retry_repo.clone(),
            RetrySchedule::new(config.retry.tiers()),
            Arc::clone(&clock),
        ));

        let processor = Arc::new(
            SyncProcessor::new(
                Arc::clone(&connections),
                Arc::clone(&mappings),
                sync_log.clone(),
                appointments.clone(),
                Arc::clone(&calendar),
                Arc::clone(&retry_queue),
                Arc::clone(&clock),
            )
            .with_config(SyncProcessorConfig {
                lock_timeout: config.sync.lock_timeout(),
                resolution_timeout: config.sync.resolution_timeout(),
                ..SyncProcessorConfig::default()
            }),
        );

        // Background workers
        let shutdown = CancellationToken::new();
        let pool = SyncWorkerPool::start_with_cancellation(
            processor.clone(),
            WorkerPoolConfig::from(&config.sync),
            shutdown.child_token(),
        );
        let dispatcher: Arc<dyn SyncDispatcher> = Arc::new(pool.dispatcher());

        let ingress = Arc::new(WebhookIngress::new(
            Arc::clone(&connections),
            Arc::clone(&dispatcher),
            Arc::clone(&retry_queue),
            Arc::clone(&clock),
            config.google.channel_token.clone(),
        ));

        let renewal_threshold = chrono::Duration::hours(config.renewal.threshold_hours);
        let registration = Arc::new(WebhookRegistrationService::new(
            Arc::clone(&connections),
            Arc::clone(&calendar),
            Arc::clone(&clock),
            config.google.webhook_callback_url.clone(),
            config.google.channel_token.clone(),
            renewal_threshold,
        ));
        let renewal = Arc::new(ChannelRenewalService::new(
            Arc::clone(&connections),
            Arc::clone(&registration),
            Arc::clone(&clock),
            RenewalSettings {
                threshold: renewal_threshold,
                spacing: Duration::from_millis(config.renewal.spacing_ms),
                per_connection_timeout: Duration::from_secs(
                    config.renewal.per_connection_timeout_secs,
                ),
            },
        ));

        let retry_drain = Arc::new(RetryDrain::new(
            Arc::clone(&retry_queue),
            processor.clone(),
            config.retry.batch_size,
        ));

        let status = Arc::new(SyncStatusService::new(
            Arc::clone(&connections),
            sync_log,
            retry_repo,
            calendar,
            clock,
        ));

        let cron_secret_digest = digest(&config.server.cron_secret);

        info!(
            db_path = %db.path().display(),
            workers = config.sync.worker_count,
            "application context initialised"
        );

        Ok(Self {
            config,
            db,
            connections,
            mappings,
            appointments,
            vault,
            retry_queue,
            processor,
            dispatcher,
            ingress,
            registration,
            renewal,
            retry_drain,
            status,
            cron_secret_digest,
            shutdown,
            workers: Mutex::new(Some(pool)),
            schedulers: Mutex::new(Vec::new()),
        })
    }

    /// Compare a presented secret with the configured one by SHA-256 digest.
    pub fn verify_secret(&self, presented: &str) -> bool {
        digest(presented) == self.cron_secret_digest
    }

    /// Token cancelled when the application shuts down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the channel renewal and retry drain schedulers.
    pub async fn start_schedulers(&self) -> Result<()> {
        let mut schedulers = self.schedulers.lock().await;
        if !schedulers.is_empty() {
            return Ok(());
        }

        let jobs = [
            (
                self.config.renewal.cron_expression.clone(),
                Duration::from_secs(600),
                Arc::new(RenewalJob::new(Arc::clone(&self.renewal)))
                    as Arc<dyn calsync_infra::ScheduledJob>,
            ),
            (
                self.config.retry.cron_expression.clone(),
                Duration::from_secs(300),
                Arc::new(RetryDrainJob::new(Arc::clone(&self.retry_drain)))
                    as Arc<dyn calsync_infra::ScheduledJob>,
            ),
        ];

        for (cron_expression, job_timeout, job) in jobs {
            let config =
                CronSchedulerConfig { cron_expression, job_timeout, ..CronSchedulerConfig::default() };
            let mut scheduler =
                CronScheduler::new(config, job).with_parent_cancellation(&self.shutdown);
            scheduler.start().await.map_err(CalSyncError::from)?;
            info!(job = scheduler.job_name(), "scheduler started");
            schedulers.push(scheduler);
        }
        Ok(())
    }

    /// Check database health by attempting a simple query
    pub async fn check_database_health(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || db.health_check())
            .await
            .map_err(|e| CalSyncError::Internal(format!("health check task failed: {e}")))?
    }

    /// Stop schedulers, then drain the worker pool.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();

        let mut schedulers = self.schedulers.lock().await;
        for scheduler in schedulers.iter_mut() {
            if let Err(err) = scheduler.stop().await {
                warn!(job = scheduler.job_name(), error = %err, "scheduler stop failed");
            }
        }
        schedulers.clear();

        if let Some(mut pool) = self.workers.lock().await.take() {
            pool.shutdown().await?;
        }
        info!("application context shut down");
        Ok(())
    }
}

fn digest(secret: &str) -> [u8; 32] {
    Sha256::digest(secret.as_bytes()).into()
}
