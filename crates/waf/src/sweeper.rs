use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::pipeline::{SecurityPipeline, SweepReport};

/// Background task that periodically evicts stale pipeline state.
pub struct Sweeper {
    pipeline: Arc<SecurityPipeline>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(pipeline: Arc<SecurityPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "state sweeper starting");

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("state sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep_once();
                }
            }
        }
    }

    pub fn sweep_once(&self) -> Option<SweepReport> {
        match self.pipeline.sweep() {
            Ok(report) => {
                if report == SweepReport::default() {
                    debug!("sweep found nothing to evict");
                } else {
                    info!(
                        rate_limit = report.rate_limit_entries,
                        reputation = report.reputation_entries,
                        geo = report.geo_entries,
                        events = report.events,
                        "evicted stale state"
                    );
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "sweep failed");
                None
            }
        }
    }
}
