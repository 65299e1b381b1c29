use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Prometheus metrics collected by the security pipeline.
pub struct WafMetrics {
    pub registry: Registry,
    pub requests_total: IntCounter,
    pub requests_blocked: IntCounter,
    pub requests_challenged: IntCounter,
    pub requests_monitored: IntCounter,
    pub requests_unavailable: IntCounter,
    pub events_total: IntCounterVec,
    pub stage_degraded: IntCounterVec,
    pub inspection_duration: HistogramVec,
    pub clearances_accepted: IntCounter,
    pub siem_events_forwarded: IntCounter,
    pub siem_events_dropped: IntCounter,
}

impl WafMetrics {
    /// Create a new `WafMetrics` with every counter and histogram registered
    /// against a fresh Prometheus registry.
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "shopguard_requests_total",
            "Total number of requests inspected",
        ))
        .expect("failed to create requests_total counter");

        let requests_blocked = IntCounter::with_opts(Opts::new(
            "shopguard_requests_blocked_total",
            "Requests rejected by the pipeline",
        ))
        .expect("failed to create requests_blocked counter");

        let requests_challenged = IntCounter::with_opts(Opts::new(
            "shopguard_requests_challenged_total",
            "Requests answered with a proof-of-work challenge",
        ))
        .expect("failed to create requests_challenged counter");

        let requests_monitored = IntCounter::with_opts(Opts::new(
            "shopguard_requests_monitored_total",
            "Requests that failed a stage but were let through in monitor mode",
        ))
        .expect("failed to create requests_monitored counter");

        let requests_unavailable = IntCounter::with_opts(Opts::new(
            "shopguard_requests_unavailable_total",
            "Requests refused with 503 by a fail-closed pipeline",
        ))
        .expect("failed to create requests_unavailable counter");

        let events_total = IntCounterVec::new(
            Opts::new("shopguard_security_events_total", "Security events by type"),
            &["type"],
        )
        .expect("failed to create events_total counter");

        let stage_degraded = IntCounterVec::new(
            Opts::new(
                "shopguard_stage_degraded_total",
                "Stage verdicts reached without all lookups succeeding",
            ),
            &["stage"],
        )
        .expect("failed to create stage_degraded counter");

        let inspection_duration = HistogramVec::new(
            HistogramOpts::new(
                "shopguard_inspection_duration_seconds",
                "Time spent in the security pipeline",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.5, 1.0, 2.5]),
            &["outcome"],
        )
        .expect("failed to create inspection_duration histogram");

        let clearances_accepted = IntCounter::with_opts(Opts::new(
            "shopguard_challenge_clearances_total",
            "Requests carrying a valid challenge clearance cookie",
        ))
        .expect("failed to create clearances_accepted counter");

        let siem_events_forwarded = IntCounter::with_opts(Opts::new(
            "shopguard_siem_events_forwarded_total",
            "Events delivered to the SIEM endpoint",
        ))
        .expect("failed to create siem_events_forwarded counter");

        let siem_events_dropped = IntCounter::with_opts(Opts::new(
            "shopguard_siem_events_dropped_total",
            "Events lost because the SIEM queue was full or the POST failed",
        ))
        .expect("failed to create siem_events_dropped counter");

        registry.register(Box::new(requests_total.clone())).expect("failed to register requests_total");
        registry.register(Box::new(requests_blocked.clone())).expect("failed to register requests_blocked");
        registry.register(Box::new(requests_challenged.clone())).expect("failed to register requests_challenged");
        registry.register(Box::new(requests_monitored.clone())).expect("failed to register requests_monitored");
        registry.register(Box::new(requests_unavailable.clone())).expect("failed to register requests_unavailable");
        registry.register(Box::new(events_total.clone())).expect("failed to register events_total");
        registry.register(Box::new(stage_degraded.clone())).expect("failed to register stage_degraded");
        registry.register(Box::new(inspection_duration.clone())).expect("failed to register inspection_duration");
        registry.register(Box::new(clearances_accepted.clone())).expect("failed to register clearances_accepted");
        registry.register(Box::new(siem_events_forwarded.clone())).expect("failed to register siem_events_forwarded");
        registry.register(Box::new(siem_events_dropped.clone())).expect("failed to register siem_events_dropped");

        Self {
            registry,
            requests_total,
            requests_blocked,
            requests_challenged,
            requests_monitored,
            requests_unavailable,
            events_total,
            stage_degraded,
            inspection_duration,
            clearances_accepted,
            siem_events_forwarded,
            siem_events_dropped,
        }
    }
}

impl Default for WafMetrics {
    fn default() -> Self {
        Self::new()
    }
}
