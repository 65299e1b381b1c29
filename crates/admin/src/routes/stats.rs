use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::SharedState;

/// GET /api/stats
///
/// Request outcome counters plus the sizes of the pipeline's in-memory state.
pub async fn get_stats(State(state): State<SharedState>) -> Json<Value> {
    let metrics = state.pipeline.metrics();
    let uptime_secs = state.start_time.elapsed().as_secs();
    let total_requests = metrics.requests_total.get();

    let requests_per_second = if uptime_secs > 0 {
        total_requests as f64 / uptime_secs as f64
    } else {
        0.0
    };

    Json(json!({
        "total_requests": total_requests,
        "blocked_requests": metrics.requests_blocked.get(),
        "challenged_requests": metrics.requests_challenged.get(),
        "monitored_requests": metrics.requests_monitored.get(),
        "unavailable_requests": metrics.requests_unavailable.get(),
        "clearances_accepted": metrics.clearances_accepted.get(),
        "uptime_secs": uptime_secs,
        "requests_per_second": requests_per_second,
        "state": state.pipeline.stats(),
    }))
}
