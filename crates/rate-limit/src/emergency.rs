use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct GlobalWindow {
    start: Option<Instant>,
    count: u64,
}

/// Global request counter that tightens per-IP limits under overload.
pub struct EmergencyThrottle {
    window: Duration,
    global_limit: u64,
    divisor: u64,
    state: Mutex<GlobalWindow>,
    active: AtomicBool,
}

impl EmergencyThrottle {
    pub fn new(window: Duration, global_limit: u64, divisor: u64) -> Self {
        Self {
            window,
            global_limit,
            divisor: divisor.max(1),
            state: Mutex::new(GlobalWindow {
                start: None,
                count: 0,
            }),
            active: AtomicBool::new(false),
        }
    }

    /// Count one request at `now`. Returns whether emergency mode is active.
    pub fn record_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let rolled = match state.start {
            Some(start) => now.saturating_duration_since(start) >= self.window,
            None => true,
        };
        if rolled {
            state.start = Some(now);
            state.count = 0;
        }

        state.count += 1;
        let active = state.count > self.global_limit;

        let was_active = self.active.swap(active, Ordering::Relaxed);
        if active && !was_active {
            tracing::warn!(
                global_count = state.count,
                global_limit = self.global_limit,
                divisor = self.divisor,
                "emergency throttling engaged"
            );
        } else if !active && was_active {
            tracing::info!("emergency throttling released");
        }

        active
    }

    /// Per-IP limit while throttling.
    pub fn scale(&self, limit: u64) -> u64 {
        (limit / self.divisor).max(1)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}
