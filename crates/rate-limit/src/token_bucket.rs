use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Internal state for a single token bucket entry.
struct TokenBucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A concurrent token bucket used as the burst guard.
///
/// Each key gets a bucket of `burst` tokens that refills at `rate` tokens per
/// second. Every allowed request consumes exactly one token.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, TokenBucketState>,
    rate: f64,
    burst: f64,
}

impl TokenBucketLimiter {
    /// * `rate`  - tokens added per second
    /// * `burst` - bucket capacity
    pub fn new(rate: f64, burst: u64) -> Self {
        Self {
            buckets: DashMap::new(),
            rate,
            burst: burst as f64,
        }
    }

    /// Try to take a token for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucketState {
                tokens: self.burst,
                last_refill: now,
            });

        let state = entry.value_mut();

        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.burst);
        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Remove buckets untouched for longer than `max_idle`.
    pub fn cleanup_at(&self, now: Instant, max_idle: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_key, state| now.saturating_duration_since(state.last_refill) < max_idle);

        let removed = before.saturating_sub(self.buckets.len());
        tracing::debug!(
            removed,
            remaining = self.buckets.len(),
            "token bucket cleanup complete"
        );
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
