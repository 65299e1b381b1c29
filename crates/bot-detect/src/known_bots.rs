/// Classification of a User-Agent string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UaClass {
    /// Known good crawler or allowlisted client; never scored.
    GoodBot,
    /// Offensive security tooling.
    MaliciousTool(&'static str),
    /// Generic automation, HTTP libraries and headless browsers.
    GenericBot(&'static str),
    /// No signature matched.
    Unclassified,
}

/// Crawlers whose traffic is wanted (search indexing, link previews).
const KNOWN_GOOD_BOTS: &[&str] = &[
    "googlebot",
    "bingbot",
    "yandexbot",
    "duckduckbot",
    "baiduspider",
    "slurp",
    "applebot",
    "facebookexternalhit",
    "twitterbot",
    "linkedinbot",
    "telegrambot",
    "slackbot",
    "discordbot",
    "whatsapp",
];

/// Scanner and exploitation tool signatures.
const MALICIOUS_TOOLS: &[&str] = &[
    "sqlmap",
    "nikto",
    "nmap",
    "masscan",
    "zgrab",
    "wpscan",
    "dirbuster",
    "gobuster",
    "acunetix",
    "nessus",
    "nuclei",
    "havij",
    "w3af",
    "hydra",
];

const GENERIC_BOTS: &[&str] = &[
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "aiohttp",
    "scrapy",
    "httpclient",
    "go-http-client",
    "java/",
    "okhttp",
    "libwww-perl",
    "mechanize",
    "phantomjs",
    "headlesschrome",
    "selenium",
    "puppeteer",
    "playwright",
    "bot",
    "crawler",
    "spider",
    "scraper",
];

/// Classify a User-Agent. Good bots and `allowlist` entries are checked
/// first, then malicious tools, then generic automation. Matching is
/// case-insensitive substring search; only the first match counts.
pub fn classify_user_agent(ua: &str, allowlist: &[String]) -> UaClass {
    if ua.is_empty() {
        return UaClass::Unclassified;
    }

    let ua_lower = ua.to_lowercase();

    if allowlist
        .iter()
        .any(|allowed| !allowed.is_empty() && ua_lower.contains(&allowed.to_lowercase()))
    {
        return UaClass::GoodBot;
    }

    if KNOWN_GOOD_BOTS.iter().any(|p| ua_lower.contains(p)) {
        return UaClass::GoodBot;
    }

    if let Some(tool) = MALICIOUS_TOOLS.iter().find(|p| ua_lower.contains(*p)) {
        return UaClass::MaliciousTool(tool);
    }

    if let Some(sig) = GENERIC_BOTS.iter().find(|p| ua_lower.contains(*p)) {
        return UaClass::GenericBot(sig);
    }

    UaClass::Unclassified
}
