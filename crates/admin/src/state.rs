use std::sync::Arc;

use shopguard_common::AppConfig;
use shopguard_waf::SecurityPipeline;

/// Shared state type alias used across all route handlers.
pub type SharedState = Arc<AdminState>;

/// State behind the admin API: the live pipeline and the configuration it
/// was built from.
pub struct AdminState {
    pub pipeline: Arc<SecurityPipeline>,
    pub config: AppConfig,
    pub start_time: std::time::Instant,
}

impl AdminState {
    pub fn new(pipeline: Arc<SecurityPipeline>, config: AppConfig) -> Self {
        Self {
            pipeline,
            config,
            start_time: std::time::Instant::now(),
        }
    }
}
