use std::collections::VecDeque;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BlockAction;
use crate::context::SecurityContext;
use crate::error::{ShieldError, ShieldResult};

/// The inspection stage that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IpReputation,
    GeoBlocked,
    RateLimited,
    BotDetected,
    Anomaly,
    MaliciousPayload,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::IpReputation => "ip_reputation",
            EventType::GeoBlocked => "geo_blocked",
            EventType::RateLimited => "rate_limited",
            EventType::BotDetected => "bot_detected",
            EventType::Anomaly => "anomaly",
            EventType::MaliciousPayload => "malicious_payload",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip_reputation" => Ok(EventType::IpReputation),
            "geo_blocked" => Ok(EventType::GeoBlocked),
            "rate_limited" => Ok(EventType::RateLimited),
            "bot_detected" => Ok(EventType::BotDetected),
            "anomaly" => Ok(EventType::Anomaly),
            "malicious_payload" => Ok(EventType::MaliciousPayload),
            other => Err(format!("unknown event type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one event of this severity to an IP's reputation score.
    pub fn reputation_weight(&self) -> u32 {
        match self {
            Severity::Critical => 30,
            Severity::High => 20,
            Severity::Medium => 10,
            Severity::Low => 5,
        }
    }
}

/// Record of a request that failed an inspection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: Severity,
    pub ip_address: IpAddr,
    pub method: String,
    pub path: String,
    pub score: u32,
    pub action: BlockAction,
    pub reasons: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(
        event_type: EventType,
        severity: Severity,
        ctx: &SecurityContext,
        score: u32,
        action: BlockAction,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type,
            severity,
            ip_address: ctx.ip_address,
            method: ctx.method.clone(),
            path: ctx.path.clone(),
            score,
            action,
            reasons,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub ip: Option<IpAddr>,
    pub event_type: Option<EventType>,
}

impl EventFilter {
    fn matches(&self, event: &SecurityEvent) -> bool {
        self.ip.map_or(true, |ip| event.ip_address == ip)
            && self.event_type.map_or(true, |t| event.event_type == t)
    }
}

/// Bounded in-memory event log. Pushing past capacity drops the oldest entry.
pub struct EventRing {
    capacity: usize,
    events: Mutex<VecDeque<SecurityEvent>>,
    total: AtomicU64,
}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            total: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> ShieldResult<MutexGuard<'_, VecDeque<SecurityEvent>>> {
        self.events
            .lock()
            .map_err(|_| ShieldError::Internal("event ring lock poisoned".to_string()))
    }

    pub fn push(&self, event: SecurityEvent) -> ShieldResult<()> {
        let mut events = self.lock()?;
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Newest-first page of events matching `filter`, with the total match count.
    pub fn page(
        &self,
        filter: &EventFilter,
        offset: usize,
        limit: usize,
    ) -> ShieldResult<(usize, Vec<SecurityEvent>)> {
        let events = self.lock()?;
        let matching: Vec<&SecurityEvent> =
            events.iter().rev().filter(|e| filter.matches(e)).collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((total, page))
    }

    /// Severities of events recorded for `ip` at or after `since`.
    pub fn severities_since(&self, ip: IpAddr, since: DateTime<Utc>) -> ShieldResult<Vec<Severity>> {
        let events = self.lock()?;
        Ok(events
            .iter()
            .filter(|e| e.ip_address == ip && e.timestamp >= since)
            .map(|e| e.severity)
            .collect())
    }

    /// Drop events older than `cutoff`. Returns how many were removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> ShieldResult<usize> {
        let mut events = self.lock()?;
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok(before - events.len())
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events ever pushed, including those since dropped.
    pub fn total_recorded(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn event(ip: &str, event_type: EventType, severity: Severity) -> SecurityEvent {
        let ctx = SecurityContext::new(ip.parse().unwrap(), "GET", "/");
        SecurityEvent::new(event_type, severity, &ctx, 10, BlockAction::Block, vec![])
    }

    #[test]
    fn test_ring_drops_oldest() {
        let ring = EventRing::new(3);
        for i in 0..5 {
            let mut e = event("1.2.3.4", EventType::Anomaly, Severity::Low);
            e.score = i;
            ring.push(e).unwrap();
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.total_recorded(), 5);

        let (total, page) = ring.page(&EventFilter::default(), 0, 10).unwrap();
        assert_eq!(total, 3);
        // Newest first; scores 0 and 1 were dropped.
        let scores: Vec<u32> = page.iter().map(|e| e.score).collect();
        assert_eq!(scores, vec![4, 3, 2]);
    }

    #[test]
    fn test_page_filters() {
        let ring = EventRing::new(10);
        ring.push(event("1.1.1.1", EventType::RateLimited, Severity::Medium)).unwrap();
        ring.push(event("2.2.2.2", EventType::BotDetected, Severity::Low)).unwrap();
        ring.push(event("1.1.1.1", EventType::BotDetected, Severity::Low)).unwrap();

        let filter = EventFilter {
            ip: Some("1.1.1.1".parse().unwrap()),
            event_type: None,
        };
        assert_eq!(ring.page(&filter, 0, 10).unwrap().0, 2);

        let filter = EventFilter {
            ip: Some("1.1.1.1".parse().unwrap()),
            event_type: Some(EventType::BotDetected),
        };
        let (total, page) = ring.page(&filter, 0, 10).unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].event_type, EventType::BotDetected);

        let (total, page) = ring.page(&EventFilter::default(), 1, 1).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn test_severities_since_and_prune() {
        let ring = EventRing::new(10);
        let mut old = event("9.9.9.9", EventType::Anomaly, Severity::Critical);
        old.timestamp = Utc::now() - Duration::hours(48);
        ring.push(old).unwrap();
        ring.push(event("9.9.9.9", EventType::Anomaly, Severity::High)).unwrap();
        ring.push(event("8.8.8.8", EventType::Anomaly, Severity::Low)).unwrap();

        let since = Utc::now() - Duration::hours(24);
        let sev = ring.severities_since("9.9.9.9".parse().unwrap(), since).unwrap();
        assert_eq!(sev, vec![Severity::High]);

        assert_eq!(ring.prune_older_than(since).unwrap(), 1);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let e = event("1.2.3.4", EventType::MaliciousPayload, Severity::Critical);
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "malicious_payload");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["ipAddress"], "1.2.3.4");
        assert_eq!(json["action"], "block");
    }
}
