use std::net::IpAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use shopguard_common::{EventFilter, EventType};

use crate::state::SharedState;

const MAX_LIMIT: usize = 1000;

/// Query parameters for the security event endpoint.
#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    pub ip: Option<String>,
    /// Event type, e.g. `malicious_payload`.
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

fn default_limit() -> usize {
    100
}

/// GET /api/events
///
/// Newest-first page of recorded security events, optionally filtered by
/// client IP and event type.
pub async fn get_events(
    State(state): State<SharedState>,
    Query(params): Query<EventQuery>,
) -> (StatusCode, Json<Value>) {
    let mut filter = EventFilter::default();

    if let Some(ref ip) = params.ip {
        match ip.parse::<IpAddr>() {
            Ok(ip) => filter.ip = Some(ip),
            Err(_) => return bad_request(format!("invalid ip '{}'", ip)),
        }
    }
    if let Some(ref event_type) = params.event_type {
        match event_type.parse::<EventType>() {
            Ok(t) => filter.event_type = Some(t),
            Err(e) => return bad_request(e),
        }
    }

    let limit = params.limit.min(MAX_LIMIT);
    match state.pipeline.events().page(&filter, params.offset, limit) {
        Ok((total, events)) => (
            StatusCode::OK,
            Json(json!({
                "total": total,
                "offset": params.offset,
                "limit": limit,
                "events": events,
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "failed to read event ring");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": "event log unavailable" })),
            )
        }
    }
}

fn bad_request(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "message": message })),
    )
}
