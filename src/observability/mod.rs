// src/observability/mod.rs
//! Logging and metrics
//!
//! Structured logging goes through `tracing`; counters go through the
//! `metrics` facade and can be scraped once a Prometheus recorder is
//! installed with [`init_metrics`]. Without a recorder the counters are
//! no-ops.

use crate::utils::config::LoggingSection;
use crate::utils::errors::{ActiveError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

pub const REQUESTS_ACCEPTED: &str = "proxima_requests_accepted_total";
pub const DUPLICATES_DROPPED: &str = "proxima_duplicates_dropped_total";
pub const REQUESTS_SERVED: &str = "proxima_requests_served_total";
pub const REQUESTS_FAILED: &str = "proxima_requests_failed_total";
pub const REPLIES_DELIVERED: &str = "proxima_replies_delivered_total";
pub const REPLIES_SUPPRESSED: &str = "proxima_replies_suppressed_total";
pub const MIGRATIONS: &str = "proxima_migrations_total";
pub const CHECKPOINTS_COMMITTED: &str = "proxima_checkpoints_committed_total";
pub const CHECKPOINTS_FAILED: &str = "proxima_checkpoints_failed_total";
pub const RECOVERIES: &str = "proxima_recoveries_total";

static TRACING: OnceCell<()> = OnceCell::new();
static METRICS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level. Calling it again is harmless.
pub fn init_tracing(config: &LoggingSection) -> Result<()> {
    TRACING
        .get_or_try_init(|| {
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.level))
                .map_err(|e| ActiveError::ConfigError(format!("Invalid log level {}: {}", config.level, e)))?;

            let builder = tracing_subscriber::fmt().with_env_filter(filter).with_thread_names(true);
            let installed = if config.json {
                builder.json().try_init()
            } else {
                builder.try_init()
            };
            if let Err(e) = installed {
                tracing::debug!("Tracing subscriber already installed: {}", e);
            }
            Ok(())
        })
        .map(|_| ())
}

/// Install the Prometheus recorder and return the handle used to render
/// the scrape output.
pub fn init_metrics() -> Result<PrometheusHandle> {
    METRICS
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| ActiveError::RuntimeError(format!("Failed to install metrics recorder: {}", e)))
        })
        .cloned()
}
