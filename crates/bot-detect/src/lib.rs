pub mod anomaly;
pub mod challenge;
pub mod known_bots;
pub mod score;

use shopguard_common::{BotDetectionConfig, SecurityContext};
use tracing::debug;

pub use anomaly::{AnomalyDetector, AnomalyVerdict};
pub use challenge::{ChallengeIssuer, CLEARANCE_COOKIE};
use known_bots::{classify_user_agent, UaClass};
use score::compute_bot_score;

/// Result of a bot detection check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotVerdict {
    /// Score reached the configured threshold.
    pub is_bot: bool,
    /// User-Agent matched an offensive tool signature.
    pub is_malicious: bool,
    pub score: u32,
    pub reasons: Vec<String>,
}

/// Header and User-Agent based bot scoring.
pub struct BotDetector {
    threshold: u32,
    allowlist: Vec<String>,
}

impl BotDetector {
    pub fn new(config: &BotDetectionConfig) -> Self {
        Self {
            threshold: config.score_threshold,
            allowlist: config.known_bots_allowlist.clone(),
        }
    }

    pub fn detect(&self, ctx: &SecurityContext) -> BotVerdict {
        let class = classify_user_agent(&ctx.user_agent, &self.allowlist);
        let (score, reasons) = compute_bot_score(ctx, class);

        let verdict = BotVerdict {
            is_bot: score >= self.threshold,
            is_malicious: matches!(class, UaClass::MaliciousTool(_)),
            score,
            reasons,
        };

        if verdict.is_bot {
            debug!(
                ip = %ctx.ip_address,
                score,
                malicious = verdict.is_malicious,
                reasons = ?verdict.reasons,
                "bot detected"
            );
        }

        verdict
    }
}
