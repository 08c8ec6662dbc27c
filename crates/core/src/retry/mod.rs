//! Retry queue: fixed-tier backoff driven by a periodic sweep

mod drain;
mod queue;
mod schedule;

pub use drain::{RetryDrain, RetryHandler, RetrySweepSummary};
pub use queue::RetryQueue;
pub use schedule::RetrySchedule;

/// Convert a std duration for instant arithmetic, saturating on overflow.
pub(crate) fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(3650))
}
