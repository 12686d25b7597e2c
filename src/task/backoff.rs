//! Retry backoff policy.

/// Exponential backoff with a cap and a small random jitter.
///
/// The delay before attempt `n` (1-indexed) is
/// `min(cap, base * 2^(n-1)) + jitter`, where jitter is uniform in
/// `[0, jitter_ms)`. The jitter prevents a burst of failures from
/// re-dispatching as a thundering herd.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub jitter_ms: u64,
}

impl BackoffPolicy {
    pub fn new(base_ms: u64, cap_ms: u64) -> Self {
        // Jitter scales with the base delay, up to a quarter second.
        Self {
            base_ms,
            cap_ms,
            jitter_ms: (base_ms / 4).min(250),
        }
    }

    /// Delay in milliseconds before the given retry attempt becomes
    /// eligible again. `retry_count` is the attempt number being scheduled,
    /// starting at 1.
    pub fn delay_ms(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1).min(32);
        let raw = self.base_ms.saturating_mul(1u64 << exponent);
        let capped = raw.min(self.cap_ms);

        if self.jitter_ms == 0 {
            capped
        } else {
            capped + rand::random::<u64>() % self.jitter_ms
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        // 1s doubling up to a 5 minute ceiling.
        Self::new(1_000, 300_000)
    }
}
