use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use shopguard_admin::{build_router, new_shared_state};
use shopguard_common::{AppConfig, SecurityContext};
use shopguard_waf::SecurityPipeline;
use tower::ServiceExt;

async fn setup() -> (Router, Arc<SecurityPipeline>) {
    let mut config = AppConfig::default();
    config.waf.challenge.secret = "admin-test-secret".to_string();
    let pipeline = Arc::new(SecurityPipeline::builder(config.clone()).build().unwrap());

    let attacks = [
        ("203.0.113.1", "q=1' OR 1=1"),
        ("203.0.113.2", "file=../../etc/passwd"),
        ("203.0.113.1", "q=<script>alert(1)</script>"),
    ];
    for (ip, query) in attacks {
        let ctx = SecurityContext::new(ip.parse().unwrap(), "GET", "/search")
            .with_header("User-Agent", "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
            .with_header("Accept", "*/*")
            .with_header("Accept-Language", "en")
            .with_header("Accept-Encoding", "gzip")
            .with_query(query);
        pipeline.inspect(&ctx).await;
    }

    let router = build_router(new_shared_state(pipeline.clone(), config));
    (router, pipeline)
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let (router, _) = setup().await;
    let (status, body) = get_json(router, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["waf_enabled"], true);
}

#[tokio::test]
async fn test_events_filtering_and_paging() {
    let (router, _) = setup().await;

    let (status, body) = get_json(router.clone(), "/api/events").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    // Newest first.
    assert_eq!(body["events"][0]["ipAddress"], "203.0.113.1");
    assert_eq!(body["events"][0]["type"], "malicious_payload");

    let (_, body) = get_json(router.clone(), "/api/events?ip=203.0.113.1&limit=1").await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["events"].as_array().unwrap().len(), 1);

    let (_, body) = get_json(router.clone(), "/api/events?type=rate_limited").await;
    assert_eq!(body["total"], 0);

    let (status, _) = get_json(router.clone(), "/api/events?type=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get_json(router, "/api/events?ip=not-an-ip").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stats_counts_outcomes() {
    let (router, _) = setup().await;
    let (status, body) = get_json(router, "/api/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 3);
    assert_eq!(body["blocked_requests"], 3);
    assert_eq!(body["state"]["events_buffered"], 3);
}

#[tokio::test]
async fn test_config_hides_secrets() {
    let (router, _) = setup().await;
    let (status, body) = get_json(router, "/api/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["waf"]["block_action"], "block");
    assert!(body["waf"]["challenge"].get("secret").is_none());
    assert!(!body.to_string().contains("admin-test-secret"));
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (router, _) = setup().await;
    let response = router
        .oneshot(Request::builder().uri("/api/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("shopguard_requests_blocked_total 3"));
    assert!(text.contains("shopguard_security_events_total{type=\"malicious_payload\"} 3"));
}
