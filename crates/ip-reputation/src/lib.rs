//! Per-IP threat reputation.
//!
//! [`ReputationChecker`] keeps a [`ThreatIntelligence`] record per address in
//! a TTL cache. On a miss it combines the internal scorer (recent security
//! events recorded against the address) with any number of pluggable
//! [`IntelligenceSource`]s and takes the highest score.

mod lists;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use shopguard_common::{EventRing, IpReputationConfig, ShieldResult, MAX_TTL_SECS};
use tracing::{debug, info, warn};

pub use lists::{IpLists, StaticListSource};

const SOURCE_TIMEOUT: StdDuration = StdDuration::from_secs(2);
const INTERNAL_SOURCE: &str = "internal";
/// Lifetime of a record built while a source was failing.
const DEGRADED_CACHE_TTL_SECS: i64 = 60;

/// What an intelligence source knows about an address.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    /// 0-100, higher is worse.
    pub score: u32,
    pub categories: Vec<String>,
    /// 0.0-1.0
    pub confidence: f64,
}

/// A pluggable provider of reputation data.
#[async_trait]
pub trait IntelligenceSource: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` means the source has no opinion on `ip`.
    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<Option<SourceReport>>;
}

/// Cached reputation record for one address.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreatIntelligence {
    pub reputation_score: u32,
    pub categories: Vec<String>,
    pub sources: Vec<String>,
    pub confidence: f64,
    pub last_seen: DateTime<Utc>,
    pub refreshed_at: DateTime<Utc>,
    /// Built while a source was failing; expires after a short TTL.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReputationVerdict {
    pub blocked: bool,
    pub score: u32,
    pub sources: Vec<String>,
    pub categories: Vec<String>,
    /// A source failed; the score may understate the risk.
    pub degraded: bool,
    pub cached: bool,
}

pub struct ReputationChecker {
    cache: DashMap<IpAddr, ThreatIntelligence>,
    sources: Vec<Arc<dyn IntelligenceSource>>,
    events: Arc<EventRing>,
    threshold: u32,
    cache_ttl: Duration,
    idle_ttl: Duration,
}

impl ReputationChecker {
    pub fn new(config: &IpReputationConfig, events: Arc<EventRing>) -> Self {
        Self {
            cache: DashMap::new(),
            sources: Vec::new(),
            events,
            threshold: config.threshold,
            cache_ttl: Duration::seconds(config.cache_ttl_secs.min(MAX_TTL_SECS) as i64),
            idle_ttl: Duration::seconds(config.idle_ttl_secs.min(MAX_TTL_SECS) as i64),
        }
    }

    /// Register an additional intelligence source. Sources are queried in
    /// registration order.
    pub fn with_source(mut self, source: Arc<dyn IntelligenceSource>) -> Self {
        info!(source = source.name(), "registered intelligence source");
        self.sources.push(source);
        self
    }

    pub async fn check(&self, ip: IpAddr) -> ShieldResult<ReputationVerdict> {
        self.check_at(ip, Utc::now()).await
    }

    pub async fn check_at(&self, ip: IpAddr, now: DateTime<Utc>) -> ShieldResult<ReputationVerdict> {
        if let Some(mut entry) = self.cache.get_mut(&ip) {
            if now - entry.refreshed_at < self.ttl_for(&entry) {
                entry.last_seen = now;
                debug!(ip = %ip, score = entry.reputation_score, "reputation cache hit");
                return Ok(self.verdict(&entry, true));
            }
        }

        let intel = self.refresh(ip, now).await?;
        let verdict = self.verdict(&intel, false);
        self.cache.insert(ip, intel);

        Ok(verdict)
    }

    fn ttl_for(&self, intel: &ThreatIntelligence) -> Duration {
        if intel.degraded {
            self.cache_ttl.min(Duration::seconds(DEGRADED_CACHE_TTL_SECS))
        } else {
            self.cache_ttl
        }
    }

    async fn refresh(&self, ip: IpAddr, now: DateTime<Utc>) -> ShieldResult<ThreatIntelligence> {
        let internal = self.internal_score(ip, now)?;

        let mut intel = ThreatIntelligence {
            reputation_score: internal,
            categories: Vec::new(),
            sources: Vec::new(),
            confidence: if internal > 0 { 0.5 } else { 0.0 },
            last_seen: now,
            refreshed_at: now,
            degraded: false,
        };
        if internal > 0 {
            intel.sources.push(INTERNAL_SOURCE.to_string());
            intel.categories.push("recent_security_events".to_string());
        }

        for source in &self.sources {
            let report = match tokio::time::timeout(SOURCE_TIMEOUT, source.lookup(ip)).await {
                Ok(Ok(report)) => report,
                Ok(Err(e)) => {
                    warn!(ip = %ip, source = source.name(), error = %e, "intelligence source failed");
                    intel.degraded = true;
                    continue;
                }
                Err(_) => {
                    warn!(ip = %ip, source = source.name(), "intelligence source timed out");
                    intel.degraded = true;
                    continue;
                }
            };

            if let Some(report) = report {
                intel.reputation_score = intel.reputation_score.max(report.score.min(100));
                intel.confidence = intel.confidence.max(report.confidence.clamp(0.0, 1.0));
                intel.sources.push(source.name().to_string());
                for category in report.categories {
                    if !intel.categories.contains(&category) {
                        intel.categories.push(category);
                    }
                }
            }
        }

        debug!(
            ip = %ip,
            score = intel.reputation_score,
            sources = ?intel.sources,
            degraded = intel.degraded,
            "reputation refreshed"
        );

        Ok(intel)
    }

    /// Score from security events recorded against `ip` within the idle TTL.
    ///
    /// Critical +30, high +20, medium +10, low +5, capped at 100.
    pub fn internal_score(&self, ip: IpAddr, now: DateTime<Utc>) -> ShieldResult<u32> {
        let since = now - self.idle_ttl;
        let score: u32 = self
            .events
            .severities_since(ip, since)?
            .iter()
            .map(|s| s.reputation_weight())
            .sum();
        Ok(score.min(100))
    }

    fn verdict(&self, intel: &ThreatIntelligence, cached: bool) -> ReputationVerdict {
        ReputationVerdict {
            blocked: intel.reputation_score >= self.threshold,
            score: intel.reputation_score,
            sources: intel.sources.clone(),
            categories: intel.categories.clone(),
            degraded: intel.degraded,
            cached,
        }
    }

    pub fn cached(&self, ip: IpAddr) -> Option<ThreatIntelligence> {
        self.cache.get(&ip).map(|e| e.value().clone())
    }

    /// Evict records not seen within the idle TTL. Returns how many were removed.
    pub fn evict_idle_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, intel| now - intel.last_seen < self.idle_ttl);
        let removed = before.saturating_sub(self.cache.len());
        debug!(removed, remaining = self.cache.len(), "reputation cache sweep complete");
        removed
    }

    /// Drop every cached record so the next check consults the sources again.
    pub fn clear(&self) -> usize {
        let removed = self.cache.len();
        self.cache.clear();
        removed
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
