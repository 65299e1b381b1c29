mod config;
mod forward;
mod upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use shopguard_waf::{SecurityPipeline, SiemForwarder, Sweeper, WafMetrics};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::forward::Forwarder;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/shopguard.yaml".to_string());

    info!(config_path = %config_path, "starting shopguard");

    let config = config::load(&config_path)?;
    let shutdown = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let metrics = Arc::new(WafMetrics::new());
    let mut builder = SecurityPipeline::builder(config.clone()).metrics(metrics.clone());

    if config.siem.enabled {
        let (forwarder, sender) = SiemForwarder::new(&config.siem, metrics.clone())?;
        builder = builder.siem(sender);
        tasks.push(tokio::spawn(forwarder.run(shutdown.clone())));
    }

    let pipeline = Arc::new(builder.build()?);

    #[cfg(unix)]
    tasks.push(tokio::spawn(reload_on_hangup(pipeline.clone(), shutdown.clone())));

    let sweeper = Sweeper::new(
        pipeline.clone(),
        Duration::from_secs(config.waf.sweep_interval_secs),
    );
    tasks.push(tokio::spawn(sweeper.run(shutdown.clone())));

    if config.server.admin.enabled {
        let state = shopguard_admin::new_shared_state(pipeline.clone(), config.clone());
        let listen = config.server.admin.listen.clone();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = shopguard_admin::run_admin_server(state, &listen, token).await {
                error!(error = %e, "admin API server error");
            }
        }));
    }

    let forwarder = Arc::new(Forwarder::new(&config.upstream)?);
    let app = shopguard_waf::protect(forward::router(forwarder), pipeline)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    info!(listen = %config.server.listen, "shopguard gateway listening");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    let serve_token = shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_token.cancelled().await })
    .await?;

    shutdown.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "background task ended abnormally");
        }
    }

    info!("shopguard stopped");
    Ok(())
}

/// Re-read the IP allow and block lists whenever the process receives SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(pipeline: Arc<SecurityPipeline>, shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!(error = %e, "failed to install SIGHUP handler, list reload disabled");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                info!("SIGHUP received, reloading IP lists");
                if let Err(e) = pipeline.reload_lists() {
                    error!(error = %e, "IP list reload failed, keeping previous lists");
                }
            }
        }
    }
}
