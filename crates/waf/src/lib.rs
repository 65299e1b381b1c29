//! Inline request-security pipeline for the storefront gateway.
//!
//! [`SecurityPipeline`] runs the reputation, geo, rate limit, bot, anomaly
//! and payload stages; [`waf_middleware`] wires it into an axum router.

pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod response;
pub mod siem;
pub mod sweeper;

use std::sync::Arc;

use axum::Router;

pub use metrics::WafMetrics;
pub use middleware::{waf_middleware, ClientIp};
pub use pipeline::{PipelineBuilder, PipelineStats, SecurityPipeline, SweepReport, Verdict};
pub use siem::{SiemForwarder, SiemSender};
pub use sweeper::Sweeper;

/// Put `router` behind the security pipeline.
pub fn protect(router: Router, pipeline: Arc<SecurityPipeline>) -> Router {
    router.layer(axum::middleware::from_fn_with_state(pipeline, waf_middleware))
}
