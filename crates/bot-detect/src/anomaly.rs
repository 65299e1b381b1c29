use chrono::Timelike;
use shopguard_common::{AnomalyDetectionConfig, SecurityContext};

const OFF_HOURS: std::ops::Range<u32> = 2..5;
const MAX_PATH_BYTES: usize = 1024;
const MAX_HEADERS: usize = 40;
const MAX_BODY_BYTES: usize = 1024 * 1024;
const MAX_PATH_SEGMENTS: usize = 15;
const STANDARD_METHODS: &[&str] = &["GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnomalyVerdict {
    pub is_anomalous: bool,
    pub score: u32,
    pub reasons: Vec<String>,
}

/// Scores requests by shape and time of day.
pub struct AnomalyDetector {
    threshold: u32,
}

impl AnomalyDetector {
    pub fn new(config: &AnomalyDetectionConfig) -> Self {
        Self {
            threshold: config.threshold,
        }
    }

    pub fn detect(&self, ctx: &SecurityContext) -> AnomalyVerdict {
        let mut score = 0;
        let mut reasons = Vec::new();

        if OFF_HOURS.contains(&ctx.timestamp.hour()) {
            score += 10;
            reasons.push(format!("off-hours request ({:02}:00 UTC)", ctx.timestamp.hour()));
        }

        if ctx.path.len() > MAX_PATH_BYTES {
            score += 20;
            reasons.push(format!("path length {}", ctx.path.len()));
        }

        if ctx.headers.len() > MAX_HEADERS {
            score += 15;
            reasons.push(format!("{} headers", ctx.headers.len()));
        }

        if ctx.body.len() > MAX_BODY_BYTES {
            score += 20;
            reasons.push(format!("body size {}", ctx.body.len()));
        }

        if !STANDARD_METHODS.contains(&ctx.method.as_str()) {
            score += 30;
            reasons.push(format!("unusual method {}", ctx.method));
        }

        if has_control_chars(&ctx.path) || has_control_chars(&ctx.raw_query) {
            score += 25;
            reasons.push("control characters in request line".to_string());
        }

        let segments = ctx.path.split('/').filter(|s| !s.is_empty()).count();
        if segments > MAX_PATH_SEGMENTS || ctx.path.contains("//") {
            score += 10;
            reasons.push("irregular path structure".to_string());
        }

        AnomalyVerdict {
            is_anomalous: score >= self.threshold,
            score,
            reasons,
        }
    }
}

/// Raw control bytes, or their percent-encoded forms (`%00`-`%1f`, `%7f`).
fn has_control_chars(s: &str) -> bool {
    if s.chars().any(|c| c.is_control()) {
        return true;
    }

    let bytes = s.as_bytes();
    bytes.windows(3).any(|w| {
        w[0] == b'%'
            && std::str::from_utf8(&w[1..])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .map(|b| b < 0x20 || b == 0x7f)
                .unwrap_or(false)
    })
}
