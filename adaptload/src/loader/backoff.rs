//! Retry backoff for unit loads.

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::Rng;

/// Upper bound on any single retry delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(8_000);

/// Multiplicative jitter applied to every delay.
pub const JITTER: RangeInclusive<f64> = 0.85..=1.15;

/// Slow networks wait twice as long between attempts.
const SLOW_NETWORK_MULTIPLIER: f64 = 2.0;

/// Exponential backoff with jitter and a hard cap.
///
/// `delay(n) = min(base × (slow ? 2 : 1) × 2^(n-1) × jitter, 8s)`
///
/// Doubling outgrows the jitter band (2 × 0.85 > 1.15), so delays never
/// shrink from one attempt to the next whatever the jitter draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    slow_network: bool,
}

impl Backoff {
    pub fn new(base: Duration, slow_network: bool) -> Self {
        Self { base, slow_network }
    }

    /// Delay before retry `attempt` (1-based) with an explicit jitter factor.
    ///
    /// `jitter` is clamped into [`JITTER`].
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let jitter = if jitter.is_nan() {
            1.0
        } else {
            jitter.clamp(*JITTER.start(), *JITTER.end())
        };
        let multiplier = if self.slow_network {
            SLOW_NETWORK_MULTIPLIER
        } else {
            1.0
        };
        // 2^31 ms already exceeds the cap.
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let millis = self.base.as_millis() as f64 * multiplier * 2f64.powi(exponent) * jitter;

        Duration::from_millis(millis.min(MAX_RETRY_DELAY.as_millis() as f64) as u64)
    }

    /// Delay before retry `attempt` with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = rand::rng().random_range(JITTER);
        self.delay_with_jitter(attempt, jitter)
    }
}
