//! Regex-based request payload inspection.
//!
//! The request path, raw query, body and header lines are joined into one
//! text blob and matched against [`rules::RULES`]. The blob is then
//! percent-decoded and, when decoding changed anything, matched again so
//! that encoded payloads are caught too.

pub mod rules;

use std::collections::HashSet;

use serde::Serialize;
use shopguard_common::SecurityContext;
use tracing::debug;

pub use rules::ThreatCategory;
use rules::{RULES, RULE_SET};

const RAW_MATCH_SCORE: u32 = 40;
const DECODED_MATCH_SCORE: u32 = 50;
const MALICIOUS_SCORE: u32 = 40;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadThreat {
    pub category: ThreatCategory,
    pub rule: &'static str,
    /// Only visible after percent-decoding.
    pub encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadVerdict {
    pub is_malicious: bool,
    pub threats: Vec<PayloadThreat>,
    pub score: u32,
}

impl PayloadVerdict {
    pub fn reasons(&self) -> Vec<String> {
        self.threats
            .iter()
            .map(|t| {
                if t.encoded {
                    format!("{} ({}, encoded)", t.rule, t.category.as_str())
                } else {
                    format!("{} ({})", t.rule, t.category.as_str())
                }
            })
            .collect()
    }
}

pub struct PayloadAnalyzer {
    max_inspect_bytes: usize,
}

impl PayloadAnalyzer {
    pub fn new(max_inspect_bytes: usize) -> Self {
        Self { max_inspect_bytes }
    }

    pub fn analyze(&self, ctx: &SecurityContext) -> PayloadVerdict {
        let blob = self.build_blob(ctx);
        let mut threats = Vec::new();
        let mut score = 0;

        let raw_hits: HashSet<usize> = RULE_SET.matches(&blob).into_iter().collect();
        for (idx, rule) in RULES.iter().enumerate() {
            if raw_hits.contains(&idx) {
                score += RAW_MATCH_SCORE;
                threats.push(PayloadThreat {
                    category: rule.category,
                    rule: rule.id,
                    encoded: false,
                });
            }
        }

        let decoded = percent_decode(&blob);
        if decoded != blob {
            for idx in RULE_SET.matches(&decoded).into_iter() {
                if raw_hits.contains(&idx) {
                    continue;
                }
                let rule = &RULES[idx];
                score += DECODED_MATCH_SCORE;
                threats.push(PayloadThreat {
                    category: rule.category,
                    rule: rule.id,
                    encoded: true,
                });
            }
        }

        let verdict = PayloadVerdict {
            is_malicious: score >= MALICIOUS_SCORE,
            threats,
            score,
        };

        if verdict.is_malicious {
            debug!(
                ip = %ctx.ip_address,
                path = %ctx.path,
                score,
                threats = ?verdict.reasons(),
                "malicious payload detected"
            );
        }

        verdict
    }

    fn build_blob(&self, ctx: &SecurityContext) -> String {
        let body_len = ctx.body.len().min(self.max_inspect_bytes);
        let body = String::from_utf8_lossy(&ctx.body[..body_len]);

        let mut blob = String::with_capacity(
            ctx.path.len() + ctx.raw_query.len() + body.len() + ctx.headers.len() * 32,
        );
        blob.push_str(&ctx.path);
        if !ctx.raw_query.is_empty() {
            blob.push('?');
            blob.push_str(&ctx.raw_query);
        }
        blob.push('\n');
        blob.push_str(&body);
        for (name, value) in &ctx.headers {
            blob.push('\n');
            blob.push_str(name);
            blob.push_str(": ");
            blob.push_str(value);
        }
        blob
    }
}

/// Decode `%XX` escapes and `+` as space. Invalid escapes pass through
/// unchanged; decoded bytes that are not UTF-8 are replaced lossily.
pub fn percent_decode(input: &str) -> String {
    let spaced = input.replace('+', " ");
    let bytes = urlencoding::decode_binary(spaced.as_bytes());
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> PayloadAnalyzer {
        PayloadAnalyzer::new(64 * 1024)
    }

    fn get(path: &str, query: &str) -> SecurityContext {
        SecurityContext::new("203.0.113.7".parse().unwrap(), "GET", path).with_query(query)
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("%3Cscript%3E"), "<script>");
        assert_eq!(percent_decode("a+b%20c"), "a b c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz%4"), "%zz%4");
        assert_eq!(percent_decode("caf%C3%A9"), "café");
        assert_eq!(percent_decode("1%2B1"), "1+1");
    }

    #[test]
    fn test_clean_request() {
        let verdict = analyzer().analyze(&get("/products/42", "ref=home&page=2"));
        assert!(!verdict.is_malicious);
        assert_eq!(verdict.score, 0);
        assert!(verdict.threats.is_empty());
    }

    #[test]
    fn test_raw_sql_injection() {
        let verdict = analyzer().analyze(&get("/search", "q=1' OR 1=1"));
        assert!(verdict.is_malicious);
        assert_eq!(verdict.score, 40);
        assert_eq!(verdict.threats[0].category, ThreatCategory::SqlInjection);
        assert!(!verdict.threats[0].encoded);
    }

    #[test]
    fn test_encoded_xss_only_caught_after_decoding() {
        let verdict = analyzer().analyze(&get("/search", "q=%3Cscript%3Ealert(1)%3C/script%3E"));
        assert!(verdict.is_malicious);
        assert_eq!(verdict.score, 50);
        assert_eq!(verdict.threats.len(), 1);
        assert_eq!(verdict.threats[0].rule, "xss-script-tag");
        assert!(verdict.threats[0].encoded);
    }

    #[test]
    fn test_body_and_headers_are_inspected() {
        let ctx = SecurityContext::new("203.0.113.7".parse().unwrap(), "POST", "/api/review")
            .with_header("X-Forwarded-Host", "shop.example; cat /etc/hosts")
            .with_body(r#"{"comment":"<iframe src=//evil.example>"}"#);
        let verdict = analyzer().analyze(&ctx);
        let categories: Vec<_> = verdict.threats.iter().map(|t| t.category).collect();
        assert!(categories.contains(&ThreatCategory::Xss));
        assert!(categories.contains(&ThreatCategory::CommandInjection));
        assert!(verdict.score >= 80);
    }

    #[test]
    fn test_checkout_json_with_hex_colour_is_clean() {
        let ctx = SecurityContext::new("203.0.113.7".parse().unwrap(), "POST", "/api/cart")
            .with_header("Content-Type", "application/json")
            .with_body(r##"{"sku":"TSHIRT-1","color":"#ff0000","qty":1,"anchor":"#reviews"}"##);
        let verdict = analyzer().analyze(&ctx);
        assert!(!verdict.is_malicious, "{:?}", verdict.threats);
        assert_eq!(verdict.score, 0);
    }

    #[test]
    fn test_body_truncated_to_inspect_limit() {
        let mut body = vec![b'a'; 128];
        body.extend_from_slice(b"<script>");
        let ctx = SecurityContext::new("203.0.113.7".parse().unwrap(), "POST", "/upload").with_body(body);

        assert!(!PayloadAnalyzer::new(128).analyze(&ctx).is_malicious);
        assert!(PayloadAnalyzer::new(256).analyze(&ctx).is_malicious);
    }
}
