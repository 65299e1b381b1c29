use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use shopguard_bot_detect::{AnomalyDetector, BotDetector, ChallengeIssuer};
use shopguard_common::{
    AppConfig, BlockAction, EventRing, EventType, FailMode, FailPolicyConfig, SecurityContext,
    SecurityEvent, Severity, ShieldResult, MAX_TTL_SECS,
};
use shopguard_geoip::GeoFilter;
use shopguard_ip_reputation::{IntelligenceSource, IpLists, ReputationChecker, StaticListSource};
use shopguard_payload::PayloadAnalyzer;
use shopguard_rate_limit::RateLimiter;
use tracing::{debug, error, info, warn};

use crate::metrics::WafMetrics;
use crate::siem::SiemSender;

/// Score recorded for a geo block.
const GEO_BLOCK_SCORE: u32 = 50;

/// Outcome of running a request through the pipeline.
#[derive(Debug, Clone)]
pub enum Verdict {
    Pass,
    /// A stage failed but `block_action` is monitor; the request proceeds.
    Monitor(SecurityEvent),
    Block {
        event: SecurityEvent,
        retry_after: Option<Duration>,
    },
    Challenge {
        event: SecurityEvent,
        page: String,
    },
    /// Pipeline error under a fail-closed policy.
    Unavailable,
}

impl Verdict {
    pub fn outcome(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Monitor(_) => "monitor",
            Verdict::Block { .. } => "block",
            Verdict::Challenge { .. } => "challenge",
            Verdict::Unavailable => "unavailable",
        }
    }

    pub fn event(&self) -> Option<&SecurityEvent> {
        match self {
            Verdict::Monitor(event)
            | Verdict::Block { event, .. }
            | Verdict::Challenge { event, .. } => Some(event),
            Verdict::Pass | Verdict::Unavailable => None,
        }
    }
}

/// A stage that rejected the request.
struct Failure {
    event_type: EventType,
    severity: Severity,
    score: u32,
    reasons: Vec<String>,
    retry_after: Option<Duration>,
    /// A solved challenge lifts this stage, so a challenge is a valid answer.
    challengeable: bool,
}

impl Failure {
    fn new(event_type: EventType, severity: Severity, score: u32, reasons: Vec<String>) -> Self {
        Self {
            event_type,
            severity,
            score,
            reasons,
            retry_after: None,
            challengeable: false,
        }
    }
}

/// Counts removed by one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rate_limit_entries: usize,
    pub reputation_entries: usize,
    pub geo_entries: usize,
    pub events: usize,
}

/// Point-in-time sizes of the pipeline's in-memory state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PipelineStats {
    pub rate_limit_keys: usize,
    pub emergency_active: bool,
    pub reputation_cache: usize,
    pub geo_cache: usize,
    pub events_buffered: usize,
    pub events_recorded: u64,
}

/// The inline request inspection pipeline.
///
/// Stages run in a fixed order: allowlist bypass, reputation, geo, rate
/// limit, bot, anomaly, payload. The first failing stage records a
/// [`SecurityEvent`] and decides the response.
pub struct SecurityPipeline {
    enabled: bool,
    block_action: BlockAction,
    challenge_mode: bool,
    fail_policy: FailPolicyConfig,
    idle_ttl: chrono::Duration,
    max_body_bytes: usize,
    trust_forwarded_for: bool,
    lists: Arc<IpLists>,
    blocklist_path: Option<PathBuf>,
    allowlist_path: Option<PathBuf>,
    reputation: Option<ReputationChecker>,
    geo: Option<GeoFilter>,
    rate_limiter: Option<RateLimiter>,
    bots: Option<BotDetector>,
    anomaly: Option<AnomalyDetector>,
    payload: PayloadAnalyzer,
    challenge: ChallengeIssuer,
    events: Arc<EventRing>,
    metrics: Arc<WafMetrics>,
    siem: Option<SiemSender>,
}

pub struct PipelineBuilder {
    config: AppConfig,
    geo: Option<GeoFilter>,
    sources: Vec<Arc<dyn IntelligenceSource>>,
    metrics: Option<Arc<WafMetrics>>,
    siem: Option<SiemSender>,
}

impl PipelineBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            geo: None,
            sources: Vec::new(),
            metrics: None,
            siem: None,
        }
    }

    /// Use a prebuilt geo filter instead of one built from `geoip` config.
    pub fn geo_filter(mut self, geo: GeoFilter) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Add an intelligence source after the static blocklist.
    pub fn intelligence_source(mut self, source: Arc<dyn IntelligenceSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn metrics(mut self, metrics: Arc<WafMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn siem(mut self, sender: SiemSender) -> Self {
        self.siem = Some(sender);
        self
    }

    pub fn build(self) -> anyhow::Result<SecurityPipeline> {
        let config = self.config;
        let events = Arc::new(EventRing::new(config.waf.event_capacity));

        let lists = Arc::new(IpLists::new());
        if let Some(ref path) = config.ip_reputation.blocklist {
            if let Err(e) = lists.load_blocklist(path) {
                warn!(error = %e, "failed to load IP blocklist");
            }
        }
        if let Some(ref path) = config.ip_reputation.allowlist {
            if let Err(e) = lists.load_allowlist(path) {
                warn!(error = %e, "failed to load IP allowlist");
            }
        }

        let reputation = config.ip_reputation.enabled.then(|| {
            let mut checker = ReputationChecker::new(&config.ip_reputation, events.clone())
                .with_source(Arc::new(StaticListSource::new(lists.clone())));
            for source in self.sources {
                checker = checker.with_source(source);
            }
            checker
        });

        let geo = match (config.geoip.enabled, self.geo) {
            (false, _) => None,
            (true, Some(geo)) => Some(geo),
            (true, None) => Some(GeoFilter::new(&config.geoip)?),
        };

        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiter::new(&config.rate_limit));
        let bots = config
            .bot_detection
            .enabled
            .then(|| BotDetector::new(&config.bot_detection));
        let anomaly = config
            .anomaly_detection
            .enabled
            .then(|| AnomalyDetector::new(&config.anomaly_detection));

        info!(
            enabled = config.waf.enabled,
            block_action = config.waf.block_action.as_str(),
            challenge_mode = config.waf.challenge_mode,
            reputation = reputation.is_some(),
            geo = geo.is_some(),
            rate_limit = rate_limiter.is_some(),
            bot_detection = bots.is_some(),
            anomaly_detection = anomaly.is_some(),
            siem = self.siem.is_some(),
            "security pipeline initialised"
        );

        Ok(SecurityPipeline {
            enabled: config.waf.enabled,
            block_action: config.waf.block_action,
            challenge_mode: config.waf.challenge_mode,
            fail_policy: config.waf.fail_policy.clone(),
            idle_ttl: chrono::Duration::seconds(config.ip_reputation.idle_ttl_secs.min(MAX_TTL_SECS) as i64),
            max_body_bytes: config.server.max_body_bytes,
            trust_forwarded_for: config.server.trust_forwarded_for,
            lists,
            blocklist_path: config.ip_reputation.blocklist.clone(),
            allowlist_path: config.ip_reputation.allowlist.clone(),
            reputation,
            geo,
            rate_limiter,
            bots,
            anomaly,
            payload: PayloadAnalyzer::new(config.waf.max_inspect_bytes),
            challenge: ChallengeIssuer::new(&config.waf.challenge),
            events,
            metrics: self.metrics.unwrap_or_else(|| Arc::new(WafMetrics::new())),
            siem: self.siem,
        })
    }
}

impl SecurityPipeline {
    pub fn builder(config: AppConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Inspect one request. Internal errors are resolved by the pipeline
    /// fail policy and never surface to the caller.
    pub async fn inspect(&self, ctx: &SecurityContext) -> Verdict {
        let start = Instant::now();
        self.metrics.requests_total.inc();

        let verdict = match self.evaluate(ctx).await {
            Ok(verdict) => verdict,
            Err(e) => match self.fail_policy.pipeline {
                FailMode::Open => {
                    error!(ip = %ctx.ip_address, error = %e, "pipeline error, failing open");
                    Verdict::Pass
                }
                FailMode::Closed => {
                    error!(ip = %ctx.ip_address, error = %e, "pipeline error, failing closed");
                    Verdict::Unavailable
                }
            },
        };

        match verdict {
            Verdict::Pass => {}
            Verdict::Monitor(_) => self.metrics.requests_monitored.inc(),
            Verdict::Block { .. } => self.metrics.requests_blocked.inc(),
            Verdict::Challenge { .. } => self.metrics.requests_challenged.inc(),
            Verdict::Unavailable => self.metrics.requests_unavailable.inc(),
        }
        self.metrics
            .inspection_duration
            .with_label_values(&[verdict.outcome()])
            .observe(start.elapsed().as_secs_f64());

        verdict
    }

    async fn evaluate(&self, ctx: &SecurityContext) -> ShieldResult<Verdict> {
        if !self.enabled {
            return Ok(Verdict::Pass);
        }

        let ip = ctx.ip_address;

        if self.lists.is_allowed(ip) {
            debug!(ip = %ip, "IP allowlisted, skipping checks");
            return Ok(Verdict::Pass);
        }

        if let Some(ref reputation) = self.reputation {
            let verdict = reputation.check(ip).await?;
            if verdict.degraded {
                self.metrics.stage_degraded.with_label_values(&["reputation"]).inc();
            }
            if verdict.blocked {
                let mut reasons = vec![format!("reputation score {}", verdict.score)];
                reasons.extend(verdict.sources.iter().map(|s| format!("source: {}", s)));
                reasons.extend(verdict.categories.iter().map(|c| format!("category: {}", c)));
                return self.fail(ctx, Failure::new(EventType::IpReputation, Severity::High, verdict.score, reasons));
            }
            if verdict.degraded && self.fail_policy.reputation == FailMode::Closed {
                let reasons = vec!["reputation lookup degraded, failing closed".to_string()];
                return self.fail(ctx, Failure::new(EventType::IpReputation, Severity::High, verdict.score, reasons));
            }
        }

        if let Some(ref geo) = self.geo {
            let verdict = geo.check(ip).await;
            if verdict.degraded {
                self.metrics.stage_degraded.with_label_values(&["geo"]).inc();
            }
            if verdict.blocked {
                let reasons = vec![format!("country {} ({:?})", verdict.country, verdict.reason)];
                return self.fail(ctx, Failure::new(EventType::GeoBlocked, Severity::Medium, GEO_BLOCK_SCORE, reasons));
            }
            if verdict.degraded && self.fail_policy.geo == FailMode::Closed {
                let reasons = vec!["country unresolved, failing closed".to_string()];
                return self.fail(ctx, Failure::new(EventType::GeoBlocked, Severity::Medium, GEO_BLOCK_SCORE, reasons));
            }
        }

        if let Some(ref limiter) = self.rate_limiter {
            let decision = limiter.check(&ip.to_string());
            if decision.blocked {
                let reasons = vec![format!(
                    "{} requests against a limit of {} ({:?})",
                    decision.request_count,
                    decision.limit,
                    decision.reason.unwrap_or(shopguard_rate_limit::RateLimitReason::WindowExceeded)
                )];
                let mut failure = Failure::new(
                    EventType::RateLimited,
                    Severity::Medium,
                    decision.request_count.min(u32::MAX as u64) as u32,
                    reasons,
                );
                failure.retry_after = Some(decision.reset_in);
                return self.fail(ctx, failure);
            }
        }

        let cleared = self.challenge.has_clearance(ctx);
        if cleared {
            self.metrics.clearances_accepted.inc();
            debug!(ip = %ip, "valid clearance cookie, skipping bot and anomaly checks");
        } else {
            if let Some(ref bots) = self.bots {
                let verdict = bots.detect(ctx);
                if verdict.is_bot {
                    let severity = if verdict.is_malicious {
                        Severity::Critical
                    } else {
                        Severity::Low
                    };
                    let mut failure = Failure::new(EventType::BotDetected, severity, verdict.score, verdict.reasons);
                    failure.challengeable = true;
                    return self.fail(ctx, failure);
                }
            }

            if let Some(ref anomaly) = self.anomaly {
                let verdict = anomaly.detect(ctx);
                if verdict.is_anomalous {
                    let mut failure = Failure::new(EventType::Anomaly, Severity::Medium, verdict.score, verdict.reasons);
                    failure.challengeable = true;
                    return self.fail(ctx, failure);
                }
            }
        }

        let verdict = self.payload.analyze(ctx);
        if verdict.is_malicious {
            let reasons = verdict.reasons();
            return self.fail(ctx, Failure::new(EventType::MaliciousPayload, Severity::Critical, verdict.score, reasons));
        }

        Ok(Verdict::Pass)
    }

    fn action_for(&self, failure: &Failure) -> BlockAction {
        match self.block_action {
            BlockAction::Monitor => BlockAction::Monitor,
            action if failure.challengeable
                && (self.challenge_mode || action == BlockAction::Challenge) =>
            {
                BlockAction::Challenge
            }
            _ => BlockAction::Block,
        }
    }

    fn fail(&self, ctx: &SecurityContext, failure: Failure) -> ShieldResult<Verdict> {
        let action = self.action_for(&failure);
        let event = SecurityEvent::new(
            failure.event_type,
            failure.severity,
            ctx,
            failure.score,
            action,
            failure.reasons,
        );

        self.events.push(event.clone())?;
        self.metrics
            .events_total
            .with_label_values(&[event.event_type.as_str()])
            .inc();
        if let Some(ref siem) = self.siem {
            siem.forward(event.clone());
        }

        match action {
            BlockAction::Block => warn!(
                ip = %event.ip_address,
                method = %event.method,
                path = %event.path,
                event_type = event.event_type.as_str(),
                score = event.score,
                reasons = ?event.reasons,
                event_id = %event.id,
                "request blocked"
            ),
            _ => info!(
                ip = %event.ip_address,
                method = %event.method,
                path = %event.path,
                event_type = event.event_type.as_str(),
                score = event.score,
                action = action.as_str(),
                event_id = %event.id,
                "security event recorded"
            ),
        }

        Ok(match action {
            BlockAction::Block => Verdict::Block {
                event,
                retry_after: failure.retry_after,
            },
            BlockAction::Challenge => Verdict::Challenge {
                page: self.challenge.issue(ctx.ip_address),
                event,
            },
            BlockAction::Monitor => Verdict::Monitor(event),
        })
    }

    /// Evict stale limiter state, idle reputation records, expired geo cache
    /// entries and events older than the reputation idle TTL.
    pub fn sweep(&self) -> ShieldResult<SweepReport> {
        let now = Utc::now();
        Ok(SweepReport {
            rate_limit_entries: self.rate_limiter.as_ref().map_or(0, |l| l.cleanup()),
            reputation_entries: self.reputation.as_ref().map_or(0, |r| r.evict_idle_at(now)),
            geo_entries: self
                .geo
                .as_ref()
                .map_or(0, |g| g.evict_expired_at(Instant::now())),
            events: self.events.prune_older_than(now - self.idle_ttl)?,
        })
    }

    /// Re-read the configured allow and block list files. A failed load keeps
    /// the previous lists. Cached reputation records are dropped so blocklist
    /// changes apply to the next request.
    pub fn reload_lists(&self) -> anyhow::Result<()> {
        self.lists
            .reload_from_config(self.blocklist_path.as_deref(), self.allowlist_path.as_deref())?;
        let dropped = self.reputation.as_ref().map_or(0, |r| r.clear());
        info!(dropped, "IP lists reloaded");
        Ok(())
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            rate_limit_keys: self.rate_limiter.as_ref().map_or(0, |l| l.tracked_keys()),
            emergency_active: self
                .rate_limiter
                .as_ref()
                .map_or(false, |l| l.emergency_active()),
            reputation_cache: self.reputation.as_ref().map_or(0, |r| r.cache_len()),
            geo_cache: self.geo.as_ref().map_or(0, |g| g.cache_len()),
            events_buffered: self.events.len(),
            events_recorded: self.events.total_recorded(),
        }
    }

    pub fn events(&self) -> &Arc<EventRing> {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<WafMetrics> {
        &self.metrics
    }

    pub fn lists(&self) -> &Arc<IpLists> {
        &self.lists
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shopguard_geoip::GeoProvider;
    use shopguard_ip_reputation::SourceReport;
    use std::net::IpAddr;

    fn config() -> AppConfig {
        AppConfig::default()
    }

    fn browser(ip: &str, path: &str) -> SecurityContext {
        SecurityContext::new(ip.parse().unwrap(), "GET", path)
            .with_header("User-Agent", "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) AppleWebKit/605.1.15 Safari/605.1.15")
            .with_header("Accept", "text/html")
            .with_header("Accept-Language", "en-GB")
            .with_header("Accept-Encoding", "gzip")
    }

    struct FixedSource {
        score: u32,
        fail: bool,
    }

    #[async_trait]
    impl IntelligenceSource for FixedSource {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _ip: IpAddr) -> anyhow::Result<Option<SourceReport>> {
            if self.fail {
                anyhow::bail!("feed down");
            }
            Ok(Some(SourceReport {
                score: self.score,
                categories: vec!["scanner".to_string()],
                confidence: 0.8,
            }))
        }
    }

    struct FixedCountry(&'static str);

    #[async_trait]
    impl GeoProvider for FixedCountry {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn lookup(&self, _ip: IpAddr) -> anyhow::Result<Option<String>> {
            Ok(Some(self.0.to_string()))
        }
    }

    #[tokio::test]
    async fn test_clean_request_passes() {
        let pipeline = SecurityPipeline::builder(config()).build().unwrap();
        let verdict = pipeline.inspect(&browser("198.51.100.10", "/products")).await;
        assert!(matches!(verdict, Verdict::Pass));
        assert_eq!(pipeline.events().len(), 0);
        assert_eq!(pipeline.metrics().requests_total.get(), 1);
    }

    #[tokio::test]
    async fn test_sql_injection_blocked() {
        let pipeline = SecurityPipeline::builder(config()).build().unwrap();
        let ctx = browser("198.51.100.10", "/search").with_query("q=1' OR 1=1");

        match pipeline.inspect(&ctx).await {
            Verdict::Block { event, retry_after } => {
                assert_eq!(event.event_type, EventType::MaliciousPayload);
                assert_eq!(event.severity, Severity::Critical);
                assert_eq!(event.score, 40);
                assert!(retry_after.is_none());
            }
            other => panic!("expected block, got {:?}", other),
        }
        assert_eq!(pipeline.events().len(), 1);
        assert_eq!(pipeline.metrics().requests_blocked.get(), 1);
    }

    #[tokio::test]
    async fn test_reputation_runs_before_payload() {
        let pipeline = SecurityPipeline::builder(config())
            .intelligence_source(Arc::new(FixedSource { score: 95, fail: false }))
            .build()
            .unwrap();
        let ctx = browser("198.51.100.10", "/search").with_query("q=<script>alert(1)</script>");

        let verdict = pipeline.inspect(&ctx).await;
        let event = verdict.event().unwrap();
        assert_eq!(event.event_type, EventType::IpReputation);
        assert_eq!(event.severity, Severity::High);
        assert_eq!(event.score, 95);
        assert_eq!(pipeline.events().len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_reputation_follows_fail_policy() {
        let open = SecurityPipeline::builder(config())
            .intelligence_source(Arc::new(FixedSource { score: 0, fail: true }))
            .build()
            .unwrap();
        assert!(matches!(open.inspect(&browser("198.51.100.10", "/")).await, Verdict::Pass));

        let mut cfg = config();
        cfg.waf.fail_policy.reputation = FailMode::Closed;
        let closed = SecurityPipeline::builder(cfg)
            .intelligence_source(Arc::new(FixedSource { score: 0, fail: true }))
            .build()
            .unwrap();
        let verdict = closed.inspect(&browser("198.51.100.10", "/")).await;
        assert!(matches!(verdict, Verdict::Block { .. }));
        assert_eq!(verdict.event().unwrap().event_type, EventType::IpReputation);
    }

    #[tokio::test]
    async fn test_geo_block_and_local_bypass() {
        let mut cfg = config();
        cfg.geoip.enabled = true;
        cfg.geoip.blocked_countries = vec!["RU".to_string()];
        let geo = GeoFilter::with_providers(&cfg.geoip, vec![Arc::new(FixedCountry("RU"))]);
        let pipeline = SecurityPipeline::builder(cfg).geo_filter(geo).build().unwrap();

        let verdict = pipeline.inspect(&browser("203.0.113.50", "/")).await;
        let event = verdict.event().unwrap();
        assert_eq!(event.event_type, EventType::GeoBlocked);
        assert_eq!(event.score, 50);
        assert_eq!(event.severity, Severity::Medium);

        let verdict = pipeline.inspect(&browser("192.168.1.20", "/")).await;
        assert!(matches!(verdict, Verdict::Pass));
    }

    #[tokio::test]
    async fn test_rate_limit_sets_retry_after() {
        let mut cfg = config();
        cfg.rate_limit.per_ip_limit = 2;
        cfg.rate_limit.burst_limit = 0;
        let pipeline = SecurityPipeline::builder(cfg).build().unwrap();

        for _ in 0..2 {
            assert!(matches!(pipeline.inspect(&browser("198.51.100.7", "/")).await, Verdict::Pass));
        }
        match pipeline.inspect(&browser("198.51.100.7", "/")).await {
            Verdict::Block { event, retry_after } => {
                assert_eq!(event.event_type, EventType::RateLimited);
                assert_eq!(event.score, 3);
                assert!(retry_after.unwrap() <= Duration::from_secs(60));
            }
            other => panic!("expected block, got {:?}", other),
        }
        // Other clients are unaffected.
        assert!(matches!(pipeline.inspect(&browser("198.51.100.8", "/")).await, Verdict::Pass));
    }

    #[tokio::test]
    async fn test_challenge_mode_for_bots_only() {
        let mut cfg = config();
        cfg.waf.challenge_mode = true;
        let pipeline = SecurityPipeline::builder(cfg).build().unwrap();

        let scanner = SecurityContext::new("198.51.100.9".parse().unwrap(), "GET", "/")
            .with_header("User-Agent", "sqlmap/1.7.2#stable (https://sqlmap.org)");
        match pipeline.inspect(&scanner).await {
            Verdict::Challenge { event, page } => {
                assert_eq!(event.event_type, EventType::BotDetected);
                assert_eq!(event.severity, Severity::Critical);
                assert_eq!(event.action, BlockAction::Challenge);
                assert!(page.contains("__sg_clearance"));
            }
            other => panic!("expected challenge, got {:?}", other),
        }

        // Payload failures are never answered with a challenge.
        let ctx = browser("198.51.100.10", "/search").with_query("q=1' OR 1=1");
        assert!(matches!(pipeline.inspect(&ctx).await, Verdict::Block { .. }));
    }

    #[tokio::test]
    async fn test_monitor_records_but_allows() {
        let mut cfg = config();
        cfg.waf.block_action = BlockAction::Monitor;
        cfg.waf.challenge_mode = true;
        let pipeline = SecurityPipeline::builder(cfg).build().unwrap();

        let ctx = browser("198.51.100.10", "/search").with_query("q=1' OR 1=1");
        match pipeline.inspect(&ctx).await {
            Verdict::Monitor(event) => assert_eq!(event.action, BlockAction::Monitor),
            other => panic!("expected monitor, got {:?}", other),
        }
        assert_eq!(pipeline.events().len(), 1);
        assert_eq!(pipeline.metrics().requests_monitored.get(), 1);
    }

    #[tokio::test]
    async fn test_disabled_pipeline_passes_everything() {
        let mut cfg = config();
        cfg.waf.enabled = false;
        let pipeline = SecurityPipeline::builder(cfg).build().unwrap();
        let ctx = browser("198.51.100.10", "/search").with_query("q=1' OR 1=1");
        assert!(matches!(pipeline.inspect(&ctx).await, Verdict::Pass));
    }

    #[tokio::test]
    async fn test_sweep_prunes_old_events() {
        let pipeline = SecurityPipeline::builder(config()).build().unwrap();
        let ctx = browser("198.51.100.10", "/search").with_query("q=1' OR 1=1");
        pipeline.inspect(&ctx).await;

        let mut old = pipeline.events().page(&Default::default(), 0, 1).unwrap().1.remove(0);
        old.timestamp = Utc::now() - chrono::Duration::days(2);
        pipeline.events().push(old).unwrap();

        let report = pipeline.sweep().unwrap();
        assert_eq!(report.events, 1);
        assert_eq!(pipeline.events().len(), 1);
        assert_eq!(pipeline.stats().events_recorded, 2);
    }

    #[tokio::test]
    async fn test_reload_lists_applies_new_blocklist() {
        let path = std::env::temp_dir().join(format!("shopguard_reload_{}.txt", std::process::id()));
        std::fs::write(&path, "# empty\n").unwrap();

        let mut cfg = config();
        cfg.ip_reputation.blocklist = Some(path.clone());
        let pipeline = SecurityPipeline::builder(cfg).build().unwrap();
        assert!(matches!(pipeline.inspect(&browser("203.0.113.77", "/")).await, Verdict::Pass));

        std::fs::write(&path, "203.0.113.0/24\n").unwrap();
        pipeline.reload_lists().unwrap();
        let verdict = pipeline.inspect(&browser("203.0.113.77", "/")).await;
        let event = verdict.event().unwrap();
        assert_eq!(event.event_type, EventType::IpReputation);
        assert_eq!(event.score, 100);

        std::fs::remove_file(&path).unwrap();
        assert!(pipeline.reload_lists().is_err());
        assert!(pipeline.lists().is_blocked("203.0.113.77".parse().unwrap()));
    }
}
