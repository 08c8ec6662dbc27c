//! Per-connection request pacing and quota accounting
//!
//! Both structures are keyed by connection id. Pacing reserves the next send
//! slot under a short synchronous lock and the caller sleeps outside it.

use std::collections::HashMap;
use std::time::Duration;

use calsync_domain::{CalSyncError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Enforces a minimum spacing between requests of one connection.
#[derive(Debug)]
pub struct RequestPacer {
    spacing: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RequestPacer {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing, next_slot: Mutex::new(HashMap::new()) }
    }

    /// Reserve the next slot and return how long to wait for it.
    pub fn reserve(&self, key: &str) -> Duration {
        let now = Instant::now();
        let mut slots = self.next_slot.lock();
        let slot = slots.get(key).copied().filter(|slot| *slot > now).unwrap_or(now);
        slots.insert(key.to_string(), slot + self.spacing);
        slot.saturating_duration_since(now)
    }

    /// Wait for this connection's next slot.
    pub async fn wait_turn(&self, key: &str) {
        let wait = self.reserve(key);
        if !wait.is_zero() {
            debug!(connection_id = key, wait_ms = wait.as_millis() as u64, "pacing request");
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct QuotaWindow {
    started: Instant,
    calls: u64,
}

/// Counts calls per connection within a rolling quota window.
#[derive(Debug)]
pub struct QuotaCounter {
    limit: u64,
    window: Duration,
    windows: DashMap<String, QuotaWindow>,
}

impl QuotaCounter {
    /// A `limit` of zero counts calls but never rejects them.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window, windows: DashMap::new() }
    }

    /// Count one call, failing fast once the window's ceiling is reached.
    pub fn try_acquire(&self, key: &str) -> Result<()> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(QuotaWindow { started: now, calls: 0 });

        if now.duration_since(entry.started) >= self.window {
            *entry = QuotaWindow { started: now, calls: 0 };
        }

        if self.limit > 0 && entry.calls >= self.limit {
            return Err(CalSyncError::RateLimitExceeded(format!(
                "local quota of {} calls per {}s reached",
                self.limit,
                self.window.as_secs()
            )));
        }

        entry.calls += 1;
        Ok(())
    }

    /// Calls made in the current window.
    pub fn calls_in_window(&self, key: &str) -> u64 {
        self.windows
            .get(key)
            .filter(|window| window.started.elapsed() < self.window)
            .map_or(0, |window| window.calls)
    }
}
