//! Metrics reporting

pub mod metrics;
pub mod recorder;

pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use recorder::{DropReason, MetricsRecorder, NoopRecorder};
