use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{ShieldError, ShieldResult};

/// Upper bound for every `*_ttl_secs` setting (ten years).
pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// Top-level configuration for the gateway and its security pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub waf: WafConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ip_reputation: IpReputationConfig,
    #[serde(default)]
    pub bot_detection: BotDetectionConfig,
    #[serde(default)]
    pub anomaly_detection: AnomalyDetectionConfig,
    #[serde(default)]
    pub geoip: GeoIpConfig,
    #[serde(default)]
    pub siem: SiemConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Use the first `X-Forwarded-For` hop as the client address.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default)]
    pub admin: AdminConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            trust_forwarded_for: false,
            max_body_bytes: default_max_body_bytes(),
            admin: AdminConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_admin_listen")]
    pub listen: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_admin_listen(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_servers")]
    pub servers: Vec<UpstreamServer>,
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            servers: default_upstream_servers(),
            timeout_secs: default_upstream_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub addr: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// What the pipeline does with a request that failed a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    Block,
    Challenge,
    Monitor,
}

impl BlockAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockAction::Block => "block",
            BlockAction::Challenge => "challenge",
            BlockAction::Monitor => "monitor",
        }
    }
}

impl FromStr for BlockAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(BlockAction::Block),
            "challenge" => Ok(BlockAction::Challenge),
            "monitor" => Ok(BlockAction::Monitor),
            other => Err(format!("unknown block action '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    Open,
    Closed,
}

/// Behaviour when a stage cannot reach a verdict (lookup failure, internal error).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailPolicyConfig {
    #[serde(default = "default_fail_mode")]
    pub pipeline: FailMode,
    #[serde(default = "default_fail_mode")]
    pub reputation: FailMode,
    #[serde(default = "default_fail_mode")]
    pub geo: FailMode,
}

impl Default for FailPolicyConfig {
    fn default() -> Self {
        Self {
            pipeline: FailMode::Open,
            reputation: FailMode::Open,
            geo: FailMode::Open,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WafConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_block_action")]
    pub block_action: BlockAction,
    /// Answer bot and anomaly detections with a challenge page.
    #[serde(default)]
    pub challenge_mode: bool,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub fail_policy: FailPolicyConfig,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_max_inspect_bytes")]
    pub max_inspect_bytes: usize,
}

impl Default for WafConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_action: BlockAction::Block,
            challenge_mode: false,
            challenge: ChallengeConfig::default(),
            fail_policy: FailPolicyConfig::default(),
            event_capacity: default_event_capacity(),
            sweep_interval_secs: default_sweep_interval(),
            max_inspect_bytes: default_max_inspect_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    #[serde(default = "default_challenge_difficulty")]
    pub difficulty: u32,
    #[serde(default = "default_challenge_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_challenge_secret", skip_serializing)]
    pub secret: String,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            difficulty: default_challenge_difficulty(),
            ttl_secs: default_challenge_ttl(),
            secret: default_challenge_secret(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_per_ip_limit")]
    pub per_ip_limit: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Token bucket capacity guarding against instantaneous bursts. 0 disables it.
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u64,
    #[serde(default)]
    pub emergency: EmergencyConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_ip_limit: default_per_ip_limit(),
            window_secs: default_window_secs(),
            burst_limit: default_burst_limit(),
            emergency: EmergencyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Total requests per window (all clients) that trigger emergency mode.
    #[serde(default = "default_emergency_global_limit")]
    pub global_limit: u64,
    /// Per-IP limit is divided by this while emergency mode is active.
    #[serde(default = "default_emergency_divisor")]
    pub divisor: u64,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            global_limit: default_emergency_global_limit(),
            divisor: default_emergency_divisor(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReputationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reputation_threshold")]
    pub threshold: u32,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,
    #[serde(default)]
    pub blocklist: Option<PathBuf>,
    #[serde(default)]
    pub allowlist: Option<PathBuf>,
}

impl Default for IpReputationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_reputation_threshold(),
            cache_ttl_secs: default_cache_ttl(),
            idle_ttl_secs: default_idle_ttl(),
            blocklist: None,
            allowlist: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bot_score_threshold")]
    pub score_threshold: u32,
    #[serde(default)]
    pub known_bots_allowlist: Vec<String>,
}

impl Default for BotDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            score_threshold: default_bot_score_threshold(),
            known_bots_allowlist: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyDetectionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_anomaly_threshold")]
    pub threshold: u32,
}

impl Default for AnomalyDetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_anomaly_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoIpConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Optional local MaxMind database, consulted before the HTTP providers.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub blocked_countries: Vec<String>,
    #[serde(default)]
    pub allowed_countries: Vec<String>,
    #[serde(default = "default_geo_providers")]
    pub providers: Vec<GeoProviderConfig>,
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for GeoIpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_path: None,
            blocked_countries: vec![],
            allowed_countries: vec![],
            providers: default_geo_providers(),
            lookup_timeout_ms: default_lookup_timeout_ms(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoProviderConfig {
    pub name: String,
    /// URL template; `{ip}` is replaced with the client address.
    pub url: String,
    #[serde(default = "default_geo_format")]
    pub format: GeoResponseFormat,
    /// JSON field holding the country code (JSON format only).
    #[serde(default)]
    pub field: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiemConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_siem_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_siem_flush_interval")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_siem_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for SiemConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            api_key: None,
            batch_size: default_siem_batch_size(),
            flush_interval_secs: default_siem_flush_interval(),
            timeout_ms: default_siem_timeout_ms(),
        }
    }
}

// Default value helpers
fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_admin_listen() -> String {
    "127.0.0.1:9090".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_body_bytes() -> usize {
    4 * 1024 * 1024
}
fn default_upstream_servers() -> Vec<UpstreamServer> {
    vec![UpstreamServer {
        addr: "127.0.0.1:3000".to_string(),
        weight: default_weight(),
    }]
}
fn default_upstream_timeout() -> u64 {
    30
}
fn default_weight() -> u32 {
    1
}
fn default_block_action() -> BlockAction {
    BlockAction::Block
}
fn default_fail_mode() -> FailMode {
    FailMode::Open
}
fn default_event_capacity() -> usize {
    10_000
}
fn default_sweep_interval() -> u64 {
    300
}
fn default_max_inspect_bytes() -> usize {
    64 * 1024
}
fn default_challenge_difficulty() -> u32 {
    16
}
fn default_challenge_ttl() -> u64 {
    3600
}
fn default_challenge_secret() -> String {
    use rand::Rng;
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}
fn default_per_ip_limit() -> u64 {
    100
}
fn default_window_secs() -> u64 {
    60
}
fn default_burst_limit() -> u64 {
    30
}
fn default_emergency_global_limit() -> u64 {
    10_000
}
fn default_emergency_divisor() -> u64 {
    4
}
fn default_reputation_threshold() -> u32 {
    80
}
fn default_cache_ttl() -> u64 {
    3600
}
fn default_idle_ttl() -> u64 {
    86_400
}
fn default_bot_score_threshold() -> u32 {
    50
}
fn default_anomaly_threshold() -> u32 {
    50
}
fn default_lookup_timeout_ms() -> u64 {
    2000
}
fn default_geo_format() -> GeoResponseFormat {
    GeoResponseFormat::Text
}
fn default_geo_providers() -> Vec<GeoProviderConfig> {
    vec![
        GeoProviderConfig {
            name: "ipapi".to_string(),
            url: "https://ipapi.co/{ip}/country/".to_string(),
            format: GeoResponseFormat::Text,
            field: None,
        },
        GeoProviderConfig {
            name: "ipwhois".to_string(),
            url: "https://ipwho.is/{ip}".to_string(),
            format: GeoResponseFormat::Json,
            field: Some("country_code".to_string()),
        },
        GeoProviderConfig {
            name: "ip-api".to_string(),
            url: "http://ip-api.com/json/{ip}?fields=countryCode".to_string(),
            format: GeoResponseFormat::Json,
            field: Some("countryCode".to_string()),
        },
    ]
}
fn default_siem_batch_size() -> usize {
    100
}
fn default_siem_flush_interval() -> u64 {
    10
}
fn default_siem_timeout_ms() -> u64 {
    5000
}

impl AppConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> ShieldResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Unset variables leave the current value untouched; set but unparseable
    /// variables are an error.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ShieldResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ENABLE_WAF") {
            self.waf.enabled = parse_bool("ENABLE_WAF", &v)?;
        }
        if let Some(v) = get("ENABLE_BOT_PROTECTION") {
            self.bot_detection.enabled = parse_bool("ENABLE_BOT_PROTECTION", &v)?;
        }
        if let Some(v) = get("ENABLE_ANOMALY_DETECTION") {
            self.anomaly_detection.enabled = parse_bool("ENABLE_ANOMALY_DETECTION", &v)?;
        }
        if let Some(v) = get("ENABLE_IP_REPUTATION") {
            self.ip_reputation.enabled = parse_bool("ENABLE_IP_REPUTATION", &v)?;
        }
        if let Some(v) = get("ENABLE_GEO_BLOCKING") {
            self.geoip.enabled = parse_bool("ENABLE_GEO_BLOCKING", &v)?;
        }
        if let Some(v) = get("ENABLE_RATE_LIMITING") {
            self.rate_limit.enabled = parse_bool("ENABLE_RATE_LIMITING", &v)?;
        }
        if let Some(v) = get("CHALLENGE_MODE") {
            self.waf.challenge_mode = parse_bool("CHALLENGE_MODE", &v)?;
        }
        if let Some(v) = get("BOT_SCORE_THRESHOLD") {
            self.bot_detection.score_threshold = parse_number("BOT_SCORE_THRESHOLD", &v)?;
        }
        if let Some(v) = get("PER_IP_RATE_LIMIT") {
            self.rate_limit.per_ip_limit = parse_number("PER_IP_RATE_LIMIT", &v)?;
        }
        if let Some(v) = get("BURST_LIMIT") {
            self.rate_limit.burst_limit = parse_number("BURST_LIMIT", &v)?;
        }
        if let Some(v) = get("ANOMALY_THRESHOLD") {
            self.anomaly_detection.threshold = parse_number("ANOMALY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("BLOCKED_COUNTRIES") {
            self.geoip.blocked_countries = parse_country_list(&v);
        }
        if let Some(v) = get("ALLOWED_COUNTRIES") {
            self.geoip.allowed_countries = parse_country_list(&v);
        }
        if let Some(v) = get("REPUTATION_THRESHOLD") {
            self.ip_reputation.threshold = parse_number("REPUTATION_THRESHOLD", &v)?;
        }
        if let Some(v) = get("BLOCK_ACTION") {
            self.waf.block_action = v.parse().map_err(|_| ShieldError::InvalidEnv {
                var: "BLOCK_ACTION".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("SIEM_ENDPOINT") {
            self.siem.endpoint = Some(v);
            self.siem.enabled = true;
        }

        Ok(())
    }

    /// Validate the configuration for consistency.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.geoip.blocked_countries.is_empty() && !self.geoip.allowed_countries.is_empty() {
            anyhow::bail!("geoip.blocked_countries and geoip.allowed_countries are mutually exclusive");
        }

        if self.rate_limit.per_ip_limit == 0 || self.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.per_ip_limit and rate_limit.window_secs must be positive");
        }

        if self.rate_limit.emergency.enabled && self.rate_limit.emergency.divisor == 0 {
            anyhow::bail!("rate_limit.emergency.divisor must be positive");
        }

        for (name, secs) in [
            ("ip_reputation.cache_ttl_secs", self.ip_reputation.cache_ttl_secs),
            ("ip_reputation.idle_ttl_secs", self.ip_reputation.idle_ttl_secs),
            ("geoip.cache_ttl_secs", self.geoip.cache_ttl_secs),
            ("waf.challenge.ttl_secs", self.waf.challenge.ttl_secs),
        ] {
            if secs > MAX_TTL_SECS {
                anyhow::bail!("{} must be at most {} seconds", name, MAX_TTL_SECS);
            }
        }

        if self.waf.event_capacity == 0 {
            anyhow::bail!("waf.event_capacity must be positive");
        }

        if self.siem.enabled && self.siem.endpoint.is_none() {
            anyhow::bail!("siem.enabled requires siem.endpoint");
        }

        if self.upstream.servers.is_empty() {
            anyhow::bail!("upstream has no servers");
        }

        for provider in &self.geoip.providers {
            if provider.format == GeoResponseFormat::Json && provider.field.is_none() {
                anyhow::bail!("geo provider '{}' uses json format without a field", provider.name);
            }
        }

        Ok(())
    }
}

fn parse_bool(var: &str, value: &str) -> ShieldResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ShieldError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: FromStr>(var: &str, value: &str) -> ShieldResult<T> {
    value.trim().parse().map_err(|_| ShieldError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_country_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}
