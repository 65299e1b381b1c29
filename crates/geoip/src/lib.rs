//! Country resolution and country-based filtering.
//!
//! [`GeoFilter`] resolves a client address through an ordered chain of
//! [`GeoProvider`]s (local MaxMind database first, then HTTP endpoints),
//! caches the answer, and checks it against the configured country lists.

mod fallback;
mod http;
mod maxmind;

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use shopguard_common::GeoIpConfig;
use tracing::{debug, info, warn};

pub use http::HttpGeoProvider;
pub use maxmind::MaxMindProvider;

/// Country code for private, loopback and other non-routable addresses.
pub const LOCAL: &str = "LOCAL";
/// Country code when no provider or fallback entry could resolve the address.
pub const UNKNOWN: &str = "UNKNOWN";

/// How long an unresolved answer is cached before the providers are asked again.
const NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(60);

/// A source of IP-to-country answers.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve `ip` to a country code. `Ok(None)` means the provider has no
    /// answer for this address.
    async fn lookup(&self, ip: IpAddr) -> anyhow::Result<Option<String>>;
}

/// Why a geo verdict came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoReason {
    /// Non-routable address.
    Local,
    /// Country is on the block list.
    CountryBlocked,
    /// An allow list is configured and the country is not on it.
    NotAllowed,
    /// Country resolved and passed the lists.
    Allowed,
    /// Country could not be determined.
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoVerdict {
    pub blocked: bool,
    pub country: String,
    pub reason: GeoReason,
    /// Every provider failed and the fallback table had no entry.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
struct CachedCountry {
    country: String,
    resolved_at: Instant,
    degraded: bool,
}

pub struct GeoFilter {
    providers: Vec<Arc<dyn GeoProvider>>,
    cache: DashMap<IpAddr, CachedCountry>,
    blocked: HashSet<String>,
    allowed: HashSet<String>,
    lookup_timeout: Duration,
    cache_ttl: Duration,
}

impl GeoFilter {
    /// Build a filter with the providers described by `config`: the MaxMind
    /// database when `database_path` is set, then each HTTP provider in order.
    pub fn new(config: &GeoIpConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.lookup_timeout_ms);
        let mut providers: Vec<Arc<dyn GeoProvider>> = Vec::new();

        if let Some(ref path) = config.database_path {
            providers.push(Arc::new(MaxMindProvider::open(path)?));
        }
        for provider in &config.providers {
            providers.push(Arc::new(HttpGeoProvider::new(provider, timeout)?));
        }

        info!(
            providers = providers.len(),
            blocked = config.blocked_countries.len(),
            allowed = config.allowed_countries.len(),
            "geo filter initialised"
        );

        Ok(Self::with_providers(config, providers))
    }

    pub fn with_providers(config: &GeoIpConfig, providers: Vec<Arc<dyn GeoProvider>>) -> Self {
        let normalise = |list: &[String]| -> HashSet<String> {
            list.iter().map(|c| c.trim().to_ascii_uppercase()).collect()
        };

        Self {
            providers,
            cache: DashMap::new(),
            blocked: normalise(&config.blocked_countries),
            allowed: normalise(&config.allowed_countries),
            lookup_timeout: Duration::from_millis(config.lookup_timeout_ms),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
        }
    }

    pub async fn check(&self, ip: IpAddr) -> GeoVerdict {
        self.check_at(ip, Instant::now()).await
    }

    pub async fn check_at(&self, ip: IpAddr, now: Instant) -> GeoVerdict {
        let (country, degraded) = self.resolve_at(ip, now).await;
        self.evaluate(country, degraded)
    }

    /// Resolve `ip` to a country code. The flag is true when the answer is
    /// [`UNKNOWN`] because every lookup failed.
    pub async fn resolve_at(&self, ip: IpAddr, now: Instant) -> (String, bool) {
        if is_local(ip) {
            return (LOCAL.to_string(), false);
        }

        if let Some(entry) = self.cache.get(&ip) {
            if now.saturating_duration_since(entry.resolved_at) < self.ttl_for(&entry) {
                return (entry.country.clone(), entry.degraded);
            }
        }

        let (country, degraded) = match self.query_providers(ip).await {
            Some(country) => (country, false),
            None => {
                warn!(ip = %ip, "country unresolved by all geo providers");
                (UNKNOWN.to_string(), true)
            }
        };

        self.cache.insert(
            ip,
            CachedCountry {
                country: country.clone(),
                resolved_at: now,
                degraded,
            },
        );
        (country, degraded)
    }

    fn ttl_for(&self, entry: &CachedCountry) -> Duration {
        if entry.degraded {
            self.cache_ttl.min(NEGATIVE_CACHE_TTL)
        } else {
            self.cache_ttl
        }
    }

    async fn query_providers(&self, ip: IpAddr) -> Option<String> {
        for provider in &self.providers {
            match tokio::time::timeout(self.lookup_timeout, provider.lookup(ip)).await {
                Ok(Ok(Some(code))) => {
                    if let Some(code) = normalise_country(&code) {
                        debug!(ip = %ip, provider = provider.name(), country = %code, "country resolved");
                        return Some(code);
                    }
                    debug!(ip = %ip, provider = provider.name(), response = %code, "ignoring malformed country code");
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    debug!(ip = %ip, provider = provider.name(), error = %e, "geo provider failed");
                }
                Err(_) => {
                    debug!(ip = %ip, provider = provider.name(), "geo provider timed out");
                }
            }
        }

        fallback::lookup(ip).map(|code| {
            debug!(ip = %ip, country = code, "country resolved from fallback table");
            code.to_string()
        })
    }

    fn evaluate(&self, country: String, degraded: bool) -> GeoVerdict {
        let (blocked, reason) = if country == LOCAL {
            (false, GeoReason::Local)
        } else if country == UNKNOWN {
            (false, GeoReason::Unresolved)
        } else if self.blocked.contains(&country) {
            (true, GeoReason::CountryBlocked)
        } else if !self.allowed.is_empty() && !self.allowed.contains(&country) {
            (true, GeoReason::NotAllowed)
        } else {
            (false, GeoReason::Allowed)
        };

        GeoVerdict {
            blocked,
            country,
            reason,
            degraded,
        }
    }

    /// Drop cache entries older than their TTL. Returns how many were removed.
    pub fn evict_expired_at(&self, now: Instant) -> usize {
        let before = self.cache.len();
        self.cache
            .retain(|_, entry| now.saturating_duration_since(entry.resolved_at) < self.ttl_for(entry));
        before.saturating_sub(self.cache.len())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Whether `ip` is private, loopback, link-local, unique-local or unspecified.
pub fn is_local(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_local(IpAddr::V4(mapped));
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

fn normalise_country(code: &str) -> Option<String> {
    let code = code.trim();
    (code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic()))
        .then(|| code.to_ascii_uppercase())
}
