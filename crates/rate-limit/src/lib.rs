//! Per-IP rate limiting for the shopguard pipeline.
//!
//! The [`RateLimiter`] facade combines three pieces:
//!
//! - **Fixed window counter** -- each client gets `per_ip_limit` requests per
//!   window. Exceeding it blocks the client until the window rolls over.
//!
//! - **Burst guard** -- an optional token bucket that stops a client from
//!   spending its whole window budget in a single instant.
//!
//! - **Emergency throttle** -- when the total request volume across all
//!   clients exceeds a global ceiling, the per-IP limit is divided until the
//!   window rolls over.
//!
//! All state lives in [`DashMap`](dashmap::DashMap)s; nothing is persisted.

pub mod emergency;
pub mod fixed_window;
pub mod token_bucket;

use std::sync::Arc;
use std::time::{Duration, Instant};

use shopguard_common::RateLimitConfig;

pub use emergency::EmergencyThrottle;
pub use fixed_window::{FixedWindowLimiter, RateLimitState, WindowDecision};
pub use token_bucket::TokenBucketLimiter;

/// Why a request was rate limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    WindowExceeded,
    Burst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub blocked: bool,
    pub remaining: u64,
    /// Time until the client's window resets.
    pub reset_in: Duration,
    pub request_count: u64,
    pub limit: u64,
    pub reason: Option<RateLimitReason>,
}

/// Cheaply cloneable handle to the shared limiter state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    window: FixedWindowLimiter,
    burst: Option<TokenBucketLimiter>,
    emergency: Option<EmergencyThrottle>,
    per_ip_limit: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_secs.max(1));

        let burst = (config.burst_limit > 0).then(|| {
            let rate = config.per_ip_limit as f64 / window.as_secs_f64();
            TokenBucketLimiter::new(rate, config.burst_limit)
        });

        let emergency = config.emergency.enabled.then(|| {
            EmergencyThrottle::new(
                window,
                config.emergency.global_limit,
                config.emergency.divisor,
            )
        });

        tracing::info!(
            per_ip_limit = config.per_ip_limit,
            window_secs = window.as_secs(),
            burst_limit = config.burst_limit,
            emergency = config.emergency.enabled,
            "creating rate limiter"
        );

        Self {
            inner: Arc::new(RateLimiterInner {
                window: FixedWindowLimiter::new(window),
                burst,
                emergency,
                per_ip_limit: config.per_ip_limit,
            }),
        }
    }

    /// Count a request from `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateLimitDecision {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&self, key: &str, now: Instant) -> RateLimitDecision {
        let inner = self.inner.as_ref();

        let limit = match inner.emergency {
            Some(ref throttle) if throttle.record_at(now) => throttle.scale(inner.per_ip_limit),
            _ => inner.per_ip_limit,
        };

        let window = inner.window.check_at(key, now, limit);
        let mut decision = RateLimitDecision {
            blocked: window.blocked,
            remaining: window.remaining,
            reset_in: window.reset_in,
            request_count: window.request_count,
            limit,
            reason: window.blocked.then_some(RateLimitReason::WindowExceeded),
        };

        if !decision.blocked {
            if let Some(ref bucket) = inner.burst {
                if !bucket.check_at(key, now) {
                    decision.blocked = true;
                    decision.reason = Some(RateLimitReason::Burst);
                }
            }
        }

        if decision.blocked {
            tracing::debug!(
                key,
                count = decision.request_count,
                limit,
                reason = ?decision.reason,
                "rate limit exceeded"
            );
        }

        decision
    }

    /// Evict stale windows and idle buckets.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn cleanup_at(&self, now: Instant) -> usize {
        let inner = self.inner.as_ref();
        let mut removed = inner.window.cleanup_at(now);
        if let Some(ref bucket) = inner.burst {
            removed += bucket.cleanup_at(now, inner.window.window() * 2);
        }
        removed
    }

    /// Number of clients with live window state.
    pub fn tracked_keys(&self) -> usize {
        self.inner.window.len()
    }

    pub fn emergency_active(&self) -> bool {
        self.inner
            .emergency
            .as_ref()
            .map(|t| t.is_active())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopguard_common::EmergencyConfig;

    fn config(per_ip_limit: u64, burst_limit: u64) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            per_ip_limit,
            window_secs: 60,
            burst_limit,
            emergency: EmergencyConfig::default(),
        }
    }

    #[test]
    fn window_through_facade() {
        let limiter = RateLimiter::new(&config(5, 0));
        let now = Instant::now();

        for i in 0..5 {
            assert!(!limiter.check_at("client-x", now).blocked, "request {} should pass", i);
        }

        let d = limiter.check_at("client-x", now);
        assert!(d.blocked, "should deny beyond window limit");
        assert_eq!(d.reason, Some(RateLimitReason::WindowExceeded));

        // Next window.
        let d = limiter.check_at("client-x", now + Duration::from_secs(60));
        assert!(!d.blocked);
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn burst_guard_limits_instant_spikes() {
        let limiter = RateLimiter::new(&config(60, 3));
        let now = Instant::now();

        for _ in 0..3 {
            assert!(!limiter.check_at("burst", now).blocked);
        }
        let d = limiter.check_at("burst", now);
        assert!(d.blocked);
        assert_eq!(d.reason, Some(RateLimitReason::Burst));

        // 60/min refills one token per second.
        assert!(!limiter.check_at("burst", now + Duration::from_secs(1)).blocked);
    }

    #[test]
    fn clone_shares_state() {
        let limiter = RateLimiter::new(&config(2, 0));
        let limiter2 = limiter.clone();
        let now = Instant::now();

        assert!(!limiter.check_at("shared", now).blocked);
        assert!(!limiter2.check_at("shared", now).blocked);

        // Both clones counted against the same window.
        assert!(limiter.check_at("shared", now).blocked);
        assert_eq!(limiter2.tracked_keys(), 1);
    }

    #[test]
    fn emergency_mode_divides_limit() {
        let mut cfg = config(8, 0);
        cfg.emergency = EmergencyConfig {
            enabled: true,
            global_limit: 4,
            divisor: 4,
        };
        let limiter = RateLimiter::new(&cfg);
        let now = Instant::now();

        // Four requests from distinct clients stay under the global ceiling.
        for i in 0..4 {
            let d = limiter.check_at(&format!("10.0.0.{}", i), now);
            assert_eq!(d.limit, 8);
        }
        assert!(!limiter.emergency_active());

        // The fifth pushes the global count over and the per-IP limit drops to 2.
        let d = limiter.check_at("victim", now);
        assert!(limiter.emergency_active());
        assert_eq!(d.limit, 2);
        assert!(!limiter.check_at("victim", now).blocked);
        assert!(limiter.check_at("victim", now).blocked);

        // A new window clears emergency mode.
        let d = limiter.check_at("victim", now + Duration::from_secs(60));
        assert_eq!(d.limit, 8);
        assert!(!limiter.emergency_active());
    }
}
