use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use shopguard_common::UpstreamConfig;
use shopguard_waf::ClientIp;
use tracing::{debug, warn};

use crate::upstream::UpstreamSelector;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards requests that passed inspection to the upstream servers.
pub struct Forwarder {
    client: reqwest::Client,
    upstreams: UpstreamSelector,
}

impl Forwarder {
    pub fn new(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let upstreams = UpstreamSelector::from_config(config);
        tracing::info!(servers = upstreams.server_count(), "upstream forwarder ready");

        Ok(Self { client, upstreams })
    }
}

/// Router that sends every path to the upstreams.
pub fn router(forwarder: Arc<Forwarder>) -> Router {
    Router::new().fallback(proxy_handler).with_state(forwarder)
}

async fn proxy_handler(State(forwarder): State<Arc<Forwarder>>, req: Request) -> Response {
    let Some(addr) = forwarder.upstreams.select() else {
        warn!("no upstream servers configured");
        return bad_gateway();
    };

    let (parts, body) = req.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", addr, path);

    // The WAF middleware has already buffered and size-checked the body.
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            return bad_gateway();
        }
    };

    let mut headers = strip_hop_by_hop(&parts.headers);
    headers.remove(header::HOST);
    if let Some(ClientIp(ip)) = parts.extensions.get::<ClientIp>() {
        if let Ok(value) = HeaderValue::from_str(&ip.to_string()) {
            headers.insert(HeaderName::from_static("x-real-ip"), value);
        }
    }
    headers.insert(
        HeaderName::from_static("x-waf-processed"),
        HeaderValue::from_static("true"),
    );

    debug!(upstream = addr, method = %parts.method, path, "forwarding request");

    let upstream = forwarder
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(resp) => resp,
        Err(e) => {
            warn!(upstream = addr, error = %e, "upstream request failed");
            return bad_gateway();
        }
    };

    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers());
    match upstream.bytes().await {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            warn!(upstream = addr, error = %e, "failed to read upstream response");
            bad_gateway()
        }
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out.remove(header::CONTENT_LENGTH);
    out
}

fn bad_gateway() -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(json!({
            "error": "Bad Gateway",
            "message": "The upstream service is unavailable.",
        })),
    )
        .into_response()
}
