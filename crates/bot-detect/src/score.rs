use shopguard_common::SecurityContext;

use crate::known_bots::UaClass;

const MALICIOUS_TOOL_SCORE: u32 = 20 + 50;
const GENERIC_BOT_SCORE: u32 = 20;
const MISSING_ACCEPT: u32 = 15;
const MISSING_ACCEPT_LANGUAGE: u32 = 10;
const MISSING_ACCEPT_ENCODING: u32 = 10;
const MANY_QUERY_PARAMS: u32 = 15;
const XHR_WITHOUT_REFERER: u32 = 20;
const UNUSUAL_UA_LENGTH: u32 = 25;

const MAX_QUERY_PARAMS: usize = 20;
const MIN_UA_LEN: usize = 8;
const MAX_UA_LEN: usize = 512;

/// Additive bot score with the reasons that contributed to it.
///
/// | Signal | Weight |
/// |---|---|
/// | malicious tool UA | 70 |
/// | generic bot UA | 20 |
/// | missing `Accept` | 15 |
/// | missing `Accept-Language` | 10 |
/// | missing `Accept-Encoding` | 10 |
/// | more than 20 query params | 15 |
/// | XHR without `Referer` | 20 |
/// | UA shorter than 8 or longer than 512 chars | 25 |
///
/// Good bots score 0 regardless of the other signals.
pub fn compute_bot_score(ctx: &SecurityContext, class: UaClass) -> (u32, Vec<String>) {
    let mut score = 0;
    let mut reasons = Vec::new();

    match class {
        UaClass::GoodBot => return (0, reasons),
        UaClass::MaliciousTool(tool) => {
            score += MALICIOUS_TOOL_SCORE;
            reasons.push(format!("malicious tool signature: {}", tool));
        }
        UaClass::GenericBot(sig) => {
            score += GENERIC_BOT_SCORE;
            reasons.push(format!("bot signature: {}", sig));
        }
        UaClass::Unclassified => {}
    }

    if !ctx.has_header("accept") {
        score += MISSING_ACCEPT;
        reasons.push("missing Accept header".to_string());
    }
    if !ctx.has_header("accept-language") {
        score += MISSING_ACCEPT_LANGUAGE;
        reasons.push("missing Accept-Language header".to_string());
    }
    if !ctx.has_header("accept-encoding") {
        score += MISSING_ACCEPT_ENCODING;
        reasons.push("missing Accept-Encoding header".to_string());
    }

    if ctx.query.len() > MAX_QUERY_PARAMS {
        score += MANY_QUERY_PARAMS;
        reasons.push(format!("{} query parameters", ctx.query.len()));
    }

    let is_xhr = ctx
        .header("x-requested-with")
        .map(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
        .unwrap_or(false);
    if is_xhr && !ctx.has_header("referer") {
        score += XHR_WITHOUT_REFERER;
        reasons.push("XMLHttpRequest without Referer".to_string());
    }

    let ua_len = ctx.user_agent.chars().count();
    if !(MIN_UA_LEN..=MAX_UA_LEN).contains(&ua_len) {
        score += UNUSUAL_UA_LENGTH;
        reasons.push(format!("unusual User-Agent length: {}", ua_len));
    }

    (score, reasons)
}
