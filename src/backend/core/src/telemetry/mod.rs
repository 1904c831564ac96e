//! Telemetry: structured logging and Prometheus metrics.
//!
//! ```rust,no_run
//! use apex_sched::telemetry::{init_telemetry, LoggingConfig, MetricsConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! init_telemetry(&LoggingConfig::default(), &MetricsConfig::default())?;
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, redact_url, LogFormat, LoggingConfig};
pub use metrics::{init_metrics, MetricsConfig};

/// Initialize logging, then metrics.
///
/// Call once at startup.
pub fn init_telemetry(logging: &LoggingConfig, metrics: &MetricsConfig) -> anyhow::Result<()> {
    init_logging(logging)?;
    init_metrics(metrics)?;
    ::tracing::debug!(
        format = ?logging.format,
        metrics_enabled = metrics.enabled,
        "Telemetry initialized"
    );
    Ok(())
}
