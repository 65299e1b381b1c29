use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Per-key counter for the current window.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    pub request_count: u64,
    pub window_start: Instant,
    pub blocked: bool,
}

/// Outcome of counting one request against a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub blocked: bool,
    pub request_count: u64,
    pub remaining: u64,
    pub reset_in: Duration,
}

/// A concurrent fixed-window request counter.
///
/// A key's window opens with its first request and lasts `window`. Once the
/// count exceeds the limit the key stays blocked until the window rolls over,
/// at which point the count and the flag reset together under the entry lock.
pub struct FixedWindowLimiter {
    windows: DashMap<String, RateLimitState>,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count a request for `key` at `now` against `limit`.
    pub fn check_at(&self, key: &str, now: Instant, limit: u64) -> WindowDecision {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitState {
                request_count: 0,
                window_start: now,
                blocked: false,
            });

        let state = entry.value_mut();

        if now.saturating_duration_since(state.window_start) >= self.window {
            state.request_count = 0;
            state.blocked = false;
            state.window_start = now;
        }

        state.request_count += 1;
        if state.request_count > limit {
            state.blocked = true;
        }

        let elapsed = now.saturating_duration_since(state.window_start);
        WindowDecision {
            blocked: state.blocked,
            request_count: state.request_count,
            remaining: limit.saturating_sub(state.request_count),
            reset_in: self.window.saturating_sub(elapsed),
        }
    }

    /// Snapshot of the state for `key`, if tracked.
    pub fn state(&self, key: &str) -> Option<RateLimitState> {
        self.windows.get(key).map(|s| s.value().clone())
    }

    /// Remove entries whose window ended more than one window ago.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        let stale_threshold = self.window * 2;
        let before = self.windows.len();

        self.windows.retain(|_key, state| {
            now.saturating_duration_since(state.window_start) < stale_threshold
        });

        let removed = before.saturating_sub(self.windows.len());
        tracing::debug!(
            removed,
            remaining = self.windows.len(),
            "fixed window cleanup complete"
        );
        removed
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn allows_up_to_limit() {
        let limiter = FixedWindowLimiter::new(MINUTE);
        let now = Instant::now();

        for i in 1..=10 {
            let d = limiter.check_at("test-client", now, 10);
            assert!(!d.blocked, "request {} should be allowed", i);
            assert_eq!(d.remaining, 10 - i);
        }

        let d = limiter.check_at("test-client", now, 10);
        assert!(d.blocked, "should deny beyond limit");
        assert_eq!(d.remaining, 0);
        assert_eq!(d.request_count, 11);
    }

    #[test]
    fn stays_blocked_for_rest_of_window() {
        let limiter = FixedWindowLimiter::new(MINUTE);
        let start = Instant::now();

        for _ in 0..4 {
            limiter.check_at("k", start, 3);
        }

        let later = start + Duration::from_secs(59);
        let d = limiter.check_at("k", later, 3);
        assert!(d.blocked);
        assert_eq!(d.reset_in, Duration::from_secs(1));
        assert!(limiter.state("k").unwrap().blocked);
    }

    #[test]
    fn window_rollover_resets_count() {
        let limiter = FixedWindowLimiter::new(MINUTE);
        let start = Instant::now();

        for _ in 0..6 {
            limiter.check_at("rotate-client", start, 5);
        }
        assert!(limiter.check_at("rotate-client", start, 5).blocked);

        let next = start + MINUTE;
        let d = limiter.check_at("rotate-client", next, 5);
        assert!(!d.blocked, "should allow in the next window");
        assert_eq!(d.request_count, 1);
        assert_eq!(d.reset_in, MINUTE);
    }

    #[test]
    fn independent_keys() {
        let limiter = FixedWindowLimiter::new(MINUTE);
        let now = Instant::now();

        assert!(!limiter.check_at("a", now, 2).blocked);
        assert!(!limiter.check_at("a", now, 2).blocked);
        assert!(limiter.check_at("a", now, 2).blocked);

        assert!(!limiter.check_at("b", now, 2).blocked);
    }

    #[test]
    fn cleanup_removes_stale_entries() {
        let limiter = FixedWindowLimiter::new(MINUTE);
        let start = Instant::now();
        limiter.check_at("will-be-stale", start, 10);
        limiter.check_at("keep-alive", start + Duration::from_secs(100), 10);

        let removed = limiter.cleanup_at(start + Duration::from_secs(130));

        assert_eq!(removed, 1);
        assert!(limiter.state("keep-alive").is_some());
        assert!(limiter.state("will-be-stale").is_none());
    }
}
