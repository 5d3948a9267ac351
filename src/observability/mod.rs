pub mod logging;
pub mod metrics;

pub use self::logging::{init_logging, mask_key, LogConfig, LogFormat};
pub use self::metrics::{init_metrics, EngineMetrics, MetricsSnapshot};
