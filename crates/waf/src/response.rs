use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shopguard_common::{EventType, SecurityEvent};

pub const WAF_STATUS_HEADER: &str = "x-waf-status";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
];

/// `403` JSON body for a blocked request. Rate-limited requests also carry
/// `Retry-After`.
pub fn blocked(event: &SecurityEvent, retry_after: Option<Duration>) -> Response {
    let message = match event.event_type {
        EventType::RateLimited => "Too many requests from this address. Try again later.",
        _ => "This request was blocked by the security policy.",
    };

    let body = json!({
        "error": "Forbidden",
        "message": message,
        "eventId": event.id,
        "timestamp": event.timestamp.to_rfc3339(),
    });

    let mut response = (StatusCode::FORBIDDEN, Json(body)).into_response();
    if let Some(wait) = retry_after {
        let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs.max(1)));
    }
    set_waf_status(response.headers_mut(), "blocked");
    response
}

/// `429` proof-of-work challenge page.
pub fn challenge(page: String) -> Response {
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Html(page)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    set_waf_status(response.headers_mut(), "challenge");
    response
}

/// `503` for a fail-closed pipeline error.
pub fn unavailable() -> Response {
    let body = json!({
        "error": "Service Unavailable",
        "message": "The request could not be inspected. Please retry shortly.",
    });
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

/// `413` for a body larger than the buffering limit.
pub fn payload_too_large(limit: usize) -> Response {
    let body = json!({
        "error": "Payload Too Large",
        "message": format!("Request body exceeds {} bytes.", limit),
    });
    (StatusCode::PAYLOAD_TOO_LARGE, Json(body)).into_response()
}

/// Attach the defensive header set and the `X-WAF-Status` marker to a
/// response that was let through.
pub fn apply_pass_headers(headers: &mut HeaderMap, status: &'static str) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    set_waf_status(headers, status);
}

fn set_waf_status(headers: &mut HeaderMap, status: &'static str) {
    headers.insert(
        HeaderName::from_static(WAF_STATUS_HEADER),
        HeaderValue::from_static(status),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopguard_common::{BlockAction, SecurityContext, Severity};

    fn event(event_type: EventType) -> SecurityEvent {
        let ctx = SecurityContext::new("203.0.113.4".parse().unwrap(), "GET", "/cart");
        SecurityEvent::new(event_type, Severity::Medium, &ctx, 101, BlockAction::Block, vec![])
    }

    #[test]
    fn test_blocked_response() {
        let response = blocked(&event(EventType::MaliciousPayload), None);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
        assert_eq!(response.headers()[WAF_STATUS_HEADER], "blocked");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let response = blocked(
            &event(EventType::RateLimited),
            Some(Duration::from_millis(12_300)),
        );
        assert_eq!(response.headers()[header::RETRY_AFTER], "13");
    }

    #[test]
    fn test_challenge_response() {
        let response = challenge("<html></html>".to_string());
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
    }

    #[test]
    fn test_pass_headers() {
        let mut headers = HeaderMap::new();
        apply_pass_headers(&mut headers, "pass");
        assert_eq!(headers["x-waf-status"], "pass");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-xss-protection"], "1; mode=block");
        assert_eq!(headers["permissions-policy"], "camera=(), microphone=(), geolocation=()");
        assert_eq!(headers.len(), 6);
    }
}
