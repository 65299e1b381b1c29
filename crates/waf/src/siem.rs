use std::sync::Arc;
use std::time::Duration;

use shopguard_common::{SecurityEvent, SiemConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::WafMetrics;

/// Events queued per batch slot before new events start being dropped.
const QUEUE_BATCHES: usize = 16;

/// Producer half handed to the pipeline. Never blocks the request path.
#[derive(Clone)]
pub struct SiemSender {
    tx: mpsc::Sender<SecurityEvent>,
    metrics: Arc<WafMetrics>,
}

impl SiemSender {
    pub fn forward(&self, event: SecurityEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.metrics.siem_events_dropped.inc();
            debug!(error = %e, "SIEM queue full, dropping event");
        }
    }
}

/// Batches security events and POSTs them to the SIEM endpoint as a JSON
/// array. Failed batches are logged and dropped.
pub struct SiemForwarder {
    rx: mpsc::Receiver<SecurityEvent>,
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    batch_size: usize,
    flush_interval: Duration,
    metrics: Arc<WafMetrics>,
}

impl SiemForwarder {
    pub fn new(config: &SiemConfig, metrics: Arc<WafMetrics>) -> anyhow::Result<(Self, SiemSender)> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("SIEM forwarding enabled without an endpoint"))?;
        let batch_size = config.batch_size.max(1);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let (tx, rx) = mpsc::channel(batch_size * QUEUE_BATCHES);

        let forwarder = Self {
            rx,
            client,
            endpoint,
            api_key: config.api_key.clone(),
            batch_size,
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            metrics: metrics.clone(),
        };

        Ok((forwarder, SiemSender { tx, metrics }))
    }

    /// Run until `shutdown` fires or every sender is dropped, flushing
    /// whatever is buffered on the way out.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            endpoint = %self.endpoint,
            batch_size = self.batch_size,
            flush_secs = self.flush_interval.as_secs(),
            "SIEM forwarder starting"
        );

        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut batch: Vec<SecurityEvent> = Vec::with_capacity(self.batch_size);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    while let Ok(event) = self.rx.try_recv() {
                        batch.push(event);
                    }
                    break;
                }
                received = self.rx.recv() => {
                    match received {
                        Some(event) => {
                            batch.push(event);
                            if batch.len() >= self.batch_size {
                                self.flush(&mut batch).await;
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    self.flush(&mut batch).await;
                }
            }
        }

        self.flush(&mut batch).await;
        info!("SIEM forwarder stopped");
    }

    async fn flush(&self, batch: &mut Vec<SecurityEvent>) {
        if batch.is_empty() {
            return;
        }

        let events = std::mem::take(batch);
        let count = events.len() as u64;

        let mut request = self.client.post(&self.endpoint).json(&events);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(_) => {
                self.metrics.siem_events_forwarded.inc_by(count);
                debug!(count, "forwarded events to SIEM");
            }
            Err(e) => {
                self.metrics.siem_events_dropped.inc_by(count);
                warn!(count, error = %e, "SIEM export failed, dropping batch");
            }
        }
    }
}
