//! Prometheus metrics.
//!
//! Components record through the `metrics` facade macros; this module only
//! installs the exporter and describes the series:
//!
//! | Name | Kind | Labels |
//! |------|------|--------|
//! | `apex_sched_ticks_total` | counter | `job_id`, `outcome` |
//! | `apex_sched_store_ops_total` | counter | `backend`, `op`, `result` |
//! | `apex_sched_errors_total` | counter | `code`, `category` |
//! | `apex_sched_jobs_registered` | gauge | `engine` |

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether the Prometheus exporter is installed
    #[serde(default)]
    pub enabled: bool,

    /// Address the scrape endpoint listens on
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,

    /// Labels added to every series
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
            global_labels: HashMap::new(),
        }
    }
}

pub(crate) fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9464))
}

/// Install the Prometheus recorder and its HTTP scrape listener.
///
/// Returns `Ok(false)` without touching the global recorder when metrics are
/// disabled. Must be called from within a Tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> anyhow::Result<bool> {
    if !config.enabled {
        tracing::debug!("Metrics exporter disabled");
        return Ok(false);
    }

    let mut builder = PrometheusBuilder::new().with_http_listener(config.listen);
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    builder.install()?;

    register_metric_descriptions();

    tracing::info!(listen = %config.listen, "Metrics exporter listening");
    Ok(true)
}

fn register_metric_descriptions() {
    describe_counter!(
        "apex_sched_ticks_total",
        "Local cron ticks by arbitration outcome (won, lost, skipped)"
    );
    describe_counter!(
        "apex_sched_store_ops_total",
        "Synchronization store operations by backend, operation and result"
    );
    describe_counter!("apex_sched_errors_total", "Errors by code and category");
    describe_gauge!(
        "apex_sched_jobs_registered",
        "Jobs currently registered with the local cron engine"
    );
}
