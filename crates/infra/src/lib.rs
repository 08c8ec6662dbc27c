//! # Calsync Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - SQLCipher-backed repositories for connections, mappings, sync log,
//!   retry queue and appointments
//! - The AES-GCM credential vault and Google OAuth token refresher
//! - The rate-limited Google Calendar HTTP client
//! - The bounded sync worker pool and cron schedulers
//! - Configuration loading
//!
//! ## Architecture
//! - Implements traits defined in `calsync-core`
//! - Depends on `calsync-domain` and `calsync-core`
//! - Contains all "impure" code (I/O, network, clocks, encryption)

pub mod config;
pub mod database;
pub mod errors;
pub mod google;
pub mod privacy;
pub mod scheduling;
pub mod vault;
pub mod workers;

// Re-export commonly used items
pub use database::{
    DbManager, SqlCipherAppointmentStore, SqlCipherConnectionRepository,
    SqlCipherEventMappingRepository, SqlCipherPool, SqlCipherPoolConfig,
    SqlCipherRetryQueueRepository, SqlCipherSyncLogRepository,
};
pub use errors::InfraError;
pub use google::{
    GoogleCalendarClient, GoogleTokenRefresher, RateLimitedHttp, RateLimitedHttpBuilder,
    TokenRefresher,
};
pub use privacy::redact_email;
pub use scheduling::{
    CronScheduler, CronSchedulerConfig, RenewalJob, RetryDrainJob, ScheduledJob, SchedulerError,
};
pub use vault::{EncryptedCredentialVault, TokenCipher};
pub use workers::{ChannelDispatcher, JobHandler, SyncWorkerPool, WorkerPoolConfig};
