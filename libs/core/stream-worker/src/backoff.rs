//! Retry delay calculation: capped exponential backoff with jitter.

use rand::RngExt;

/// Exponential backoff envelope for retry scheduling.
///
/// Attempt n (1-based) waits `min(base * 2^(n-1), max)` seconds plus a
/// uniform jitter in `[0, 0.25 * base)` to spread thundering herds,
/// truncated to whole seconds.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl BackoffPolicy {
    pub fn new(base_delay_secs: u64, max_delay_secs: u64) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
        }
    }

    /// Delay in whole seconds before retry attempt `attempt` (1-based).
    pub fn delay_secs(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(63);
        let exponential = self
            .base_delay_secs
            .saturating_mul(1u64 << shift)
            .min(self.max_delay_secs);

        if exponential == 0 {
            return 0;
        }

        let jitter = rand::rng().random_range(0.0..exponential as f64 * 0.25);
        exponential + jitter as u64
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(2, 60)
    }
}
