//! A token-bucket rate limiter used to turn a configured maximum transfer
//! speed into a per-call "how many bytes may I send right now" allowance.
//!
//! A single [`RateLimiter`] is shared across every channel belonging to one
//! transfer: each channel's send-control loop asks for an
//! allowance before dequeuing a DATA fragment, and the limiter prevents the
//! sum across all channels from exceeding the configured cap even though no
//! individual channel tracks the others' sends.

use crate::time::TimeProvider;
use std::sync::Arc;
use std::time::Duration;

/// Shared, mutation-free limiter state. Callers serialize access (the
/// dispatcher is single-threaded; see `swift-core::dispatcher`), so this
/// holds plain fields rather than atomics.
pub struct RateLimiter {
    clock: Arc<dyn TimeProvider>,
    max_bytes_per_sec: f64,
    bucket: f64,
    capacity: f64,
    last_refill: std::time::Instant,
}

impl RateLimiter {
    /// `max_bytes_per_sec == 0.0` means unlimited: `allow` always grants the
    /// full request.
    pub fn new(clock: Arc<dyn TimeProvider>, max_bytes_per_sec: f64) -> Self {
        let now = clock.now();
        let capacity = (max_bytes_per_sec).max(1.0);
        Self {
            clock,
            max_bytes_per_sec,
            bucket: capacity,
            capacity,
            last_refill: now,
        }
    }

    pub fn set_max_bytes_per_sec(&mut self, max_bytes_per_sec: f64) {
        self.max_bytes_per_sec = max_bytes_per_sec;
        self.capacity = max_bytes_per_sec.max(1.0);
        self.bucket = self.bucket.min(self.capacity);
    }

    pub fn max_bytes_per_sec(&self) -> f64 {
        self.max_bytes_per_sec
    }

    fn refill(&mut self) {
        if self.max_bytes_per_sec <= 0.0 {
            return;
        }
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.last_refill = now;
        self.bucket = (self.bucket + elapsed.as_secs_f64() * self.max_bytes_per_sec)
            .min(self.capacity);
    }

    /// Returns how many of `requested` bytes may be sent right now, consuming
    /// that many tokens from the bucket. Unlimited (`max_bytes_per_sec ==
    /// 0.0`) always grants the full request.
    pub fn allow(&mut self, requested: usize) -> usize {
        if self.max_bytes_per_sec <= 0.0 {
            return requested;
        }
        self.refill();
        let granted = (requested as f64).min(self.bucket).max(0.0);
        self.bucket -= granted;
        granted as usize
    }

    /// How long the caller should wait before `allow` would grant `bytes`.
    pub fn wait_for(&self, bytes: usize) -> Duration {
        if self.max_bytes_per_sec <= 0.0 || (bytes as f64) <= self.bucket {
            return Duration::ZERO;
        }
        let shortfall = bytes as f64 - self.bucket;
        Duration::from_secs_f64(shortfall / self.max_bytes_per_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualTimeProvider;

    #[test]
    fn unlimited_always_grants_full_request() {
        let clock = Arc::new(ManualTimeProvider::new());
        let mut limiter = RateLimiter::new(clock, 0.0);
        assert_eq!(limiter.allow(1_000_000), 1_000_000);
    }

    #[test]
    fn limited_bucket_drains_and_refills() {
        let clock = Arc::new(ManualTimeProvider::new());
        let mut limiter = RateLimiter::new(clock.clone(), 1000.0);
        assert_eq!(limiter.allow(1000), 1000);
        assert_eq!(limiter.allow(1), 0);
        clock.advance(Duration::from_millis(500));
        assert_eq!(limiter.allow(1000), 500);
    }
}
