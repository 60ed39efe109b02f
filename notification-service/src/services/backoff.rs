//! Retry delay policy for failed dispatch attempts.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter.
///
/// The n-th failed attempt waits `base * 2^(n-1)`, capped at `max_delay`,
/// then scaled by a random factor in `[1 - jitter, 1 + jitter]` and clamped
/// to the cap again.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            jitter_ratio: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_ratio: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_ratio: jitter_ratio.clamp(0.0, 0.99),
        }
    }

    /// Delay before retrying after `attempt` failures, without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay_ms = self.base_delay.as_millis() as f64 * 2f64.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Delay before retrying after `attempt` failures, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        if self.jitter_ratio <= 0.0 {
            return base;
        }

        let factor = rand::thread_rng().gen_range(-self.jitter_ratio..=self.jitter_ratio);
        let jittered_ms = base.as_millis() as f64 * (1.0 + factor);
        let clamped_ms = jittered_ms.clamp(0.0, self.max_delay.as_millis() as f64);
        Duration::from_millis(clamped_ms as u64)
    }
}
