//! Execution metrics for worker pools.

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
