//! tideline-metrics: observability for the poll scheduler and update
//! pipeline.
//!
//! # Architecture
//!
//! ```text
//! PollScheduler ──set_tracked_images()──┐
//!                                       ├──► MetricsSink (TidelineMetrics)
//! UpdatePipeline ──record_upgrade()─────┘
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for a /metrics endpoint
//! ```

pub mod prometheus;
pub mod sink;

pub use prometheus::render_prometheus;
pub use sink::{MetricsSink, NoopMetrics, TidelineMetrics, UpgradeOutcome};
