use std::time::Duration;

/// Fixed backoff tiers.
///
/// The tier index is the item's `attempt_count`: the first enqueue waits
/// `tiers[0]`, the n-th failed re-try waits `tiers[n]`, and once the tiers
/// run out the item fails permanently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    tiers: Vec<Duration>,
}

impl RetrySchedule {
    /// Build a schedule; an empty list falls back to the default tiers.
    pub fn new(tiers: Vec<Duration>) -> Self {
        if tiers.is_empty() {
            Self::default()
        } else {
            Self { tiers }
        }
    }

    /// Delay before the re-try at `tier`, or `None` once exhausted.
    pub fn delay_for(&self, tier: u32) -> Option<Duration> {
        usize::try_from(tier).ok().and_then(|idx| self.tiers.get(idx).copied())
    }

    /// Number of re-tries before an item fails permanently.
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.tiers.len()).unwrap_or(u32::MAX)
    }

    pub fn tiers(&self) -> &[Duration] {
        &self.tiers
    }
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            tiers: vec![
                Duration::from_secs(60),
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
            ],
        }
    }
}
