pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use shopguard_common::AppConfig;
use shopguard_waf::SecurityPipeline;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AdminState, SharedState};

/// Build the Axum router with all admin API routes and middleware.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health_check))
        .route("/api/metrics", get(routes::metrics::get_metrics))
        .route("/api/stats", get(routes::stats::get_stats))
        .route("/api/events", get(routes::events::get_events))
        .route("/api/config", get(routes::config::get_config))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Serve the admin API on `listen_addr` until `shutdown` fires.
pub async fn run_admin_server(
    state: SharedState,
    listen_addr: &str,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(listen = listen_addr, "admin API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

pub fn new_shared_state(pipeline: Arc<SecurityPipeline>, config: AppConfig) -> SharedState {
    Arc::new(AdminState::new(pipeline, config))
}
