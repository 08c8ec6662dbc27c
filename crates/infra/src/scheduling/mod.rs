//! Scheduling infrastructure for periodic sync work
//!
//! - Channel renewal (daily by default)
//! - Retry queue sweep (every minute by default)
//!
//! Both run on [`CronScheduler`], which tracks its monitor task, supports
//! cancellation and wraps every job run in a timeout.

pub mod cron_scheduler;
pub mod error;
pub mod jobs;

pub use cron_scheduler::{CronScheduler, CronSchedulerConfig, ScheduledJob};
pub use error::{SchedulerError, SchedulerResult};
pub use jobs::{RenewalJob, RetryDrainJob};
