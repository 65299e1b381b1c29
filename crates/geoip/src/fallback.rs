use std::net::IpAddr;

use ipnet::IpNet;
use once_cell::sync::Lazy;
use shopguard_common::IpPrefixMap;

/// Coarse allocations used when every provider fails.
const FALLBACK_PREFIXES: &[(&str, &str)] = &[
    ("3.0.0.0/8", "US"),
    ("8.8.8.0/24", "US"),
    ("8.8.4.0/24", "US"),
    ("13.32.0.0/15", "US"),
    ("17.0.0.0/8", "US"),
    ("1.0.0.0/24", "AU"),
    ("1.1.1.0/24", "AU"),
    ("2.16.0.0/13", "NL"),
    ("5.45.192.0/18", "RU"),
    ("5.255.192.0/18", "RU"),
    ("31.13.24.0/21", "IE"),
    ("36.0.0.0/12", "CN"),
    ("58.14.0.0/15", "CN"),
    ("77.88.0.0/18", "RU"),
    ("81.2.69.0/24", "GB"),
    ("101.0.0.0/22", "AU"),
    ("103.21.244.0/22", "US"),
    ("114.114.114.0/24", "CN"),
    ("133.0.0.0/8", "JP"),
    ("175.45.176.0/22", "KP"),
    ("185.60.216.0/22", "IE"),
    ("200.160.0.0/20", "BR"),
    ("2001:4860::/32", "US"),
    ("2a00:1450::/32", "IE"),
    ("2a02:6b8::/32", "RU"),
];

static FALLBACK_TABLE: Lazy<IpPrefixMap<&'static str>> = Lazy::new(|| {
    FALLBACK_PREFIXES
        .iter()
        .filter_map(|(prefix, country)| {
            prefix.parse::<IpNet>().ok().map(|net| (net, *country))
        })
        .collect()
});

pub(crate) fn lookup(ip: IpAddr) -> Option<&'static str> {
    FALLBACK_TABLE.get(ip).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_prefix_parses() {
        assert_eq!(FALLBACK_TABLE.len(), FALLBACK_PREFIXES.len());
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup("8.8.8.8".parse().unwrap()), Some("US"));
        assert_eq!(lookup("114.114.114.114".parse().unwrap()), Some("CN"));
        assert_eq!(lookup("2a02:6b8::1".parse().unwrap()), Some("RU"));
        assert_eq!(lookup("198.51.100.1".parse().unwrap()), None);
    }
}
