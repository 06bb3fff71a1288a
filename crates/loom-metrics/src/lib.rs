pub mod collector;
pub mod types;

pub use collector::{ErrorEntry, MetricsCollector, MetricsStats, DEFAULT_ANOMALY_K, DEFAULT_MAX_HISTORY};
pub use types::WorkflowMetrics;
