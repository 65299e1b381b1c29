use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, request::Parts};
use axum::middleware::Next;
use axum::response::Response;
use shopguard_common::SecurityContext;
use tracing::{info, warn};

use crate::pipeline::{SecurityPipeline, Verdict};
use crate::response;

/// Client address the pipeline inspected, attached to requests that pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Inspect every request before it reaches the inner service.
///
/// The body is buffered up to `server.max_body_bytes` so the payload stage
/// can see it, then handed on unchanged.
pub async fn waf_middleware(
    State(pipeline): State<Arc<SecurityPipeline>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let limit = pipeline.max_body_bytes();
    let (mut parts, body) = req.into_parts();
    let client_ip = client_ip(&parts, pipeline.trust_forwarded_for());

    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        warn!(client_ip = %client_ip, limit, "request body too large");
        return response::payload_too_large(limit);
    }

    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(client_ip = %client_ip, limit, error = %e, "failed to buffer request body");
            return response::payload_too_large(limit);
        }
    };

    let ctx = security_context(&parts, client_ip, bytes.clone());
    let verdict = pipeline.inspect(&ctx).await;

    info!(
        client_ip = %client_ip,
        method = %parts.method,
        path = %parts.uri.path(),
        outcome = verdict.outcome(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request inspected"
    );

    let status = match verdict {
        Verdict::Pass => "pass",
        Verdict::Monitor(_) => "monitor",
        Verdict::Block { event, retry_after } => return response::blocked(&event, retry_after),
        Verdict::Challenge { page, .. } => return response::challenge(page),
        Verdict::Unavailable => return response::unavailable(),
    };

    parts.extensions.insert(ClientIp(client_ip));
    let req = Request::from_parts(parts, Body::from(bytes));
    let mut resp = next.run(req).await;
    response::apply_pass_headers(resp.headers_mut(), status);
    resp
}

/// Client address: the first `X-Forwarded-For` hop when trusted, otherwise
/// the socket peer.
fn client_ip(parts: &Parts, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn security_context(parts: &Parts, client_ip: IpAddr, body: bytes::Bytes) -> SecurityContext {
    let mut ctx = SecurityContext::new(client_ip, parts.method.as_str(), parts.uri.path());
    for (name, value) in parts.headers.iter() {
        ctx = ctx.with_header(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
    }
    if let Some(query) = parts.uri.query() {
        ctx = ctx.with_query(query);
    }
    ctx.with_body(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(xff: Option<&str>, peer: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder().uri("/cart?id=3");
        if let Some(xff) = xff {
            builder = builder.header("x-forwarded-for", xff);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        if let Some(peer) = peer {
            parts
                .extensions
                .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        parts
    }

    #[test]
    fn test_client_ip_from_peer() {
        let p = parts(Some("203.0.113.1"), Some("10.0.0.5:51000"));
        assert_eq!(client_ip(&p, false), "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_client_ip_trusted_forwarded_for() {
        let p = parts(Some("203.0.113.1, 10.0.0.1"), Some("10.0.0.5:51000"));
        assert_eq!(client_ip(&p, true), "203.0.113.1".parse::<IpAddr>().unwrap());

        let garbage = parts(Some("not-an-ip"), Some("10.0.0.5:51000"));
        assert_eq!(client_ip(&garbage, true), "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_client_ip_without_peer() {
        let p = parts(None, None);
        assert_eq!(client_ip(&p, false), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_security_context_copies_request() {
        let p = parts(None, None);
        let ctx = security_context(&p, "10.0.0.5".parse().unwrap(), bytes::Bytes::from_static(b"x=1"));
        assert_eq!(ctx.method, "GET");
        assert_eq!(ctx.path, "/cart");
        assert_eq!(ctx.raw_query, "id=3");
        assert_eq!(&ctx.body[..], b"x=1");
    }
}
