//! Prometheus export of process-manager outcomes.
//!
//! [`PrometheusMetrics`] is a result and stats handler for
//! [`zpm_core::ProcessManager`]. Install it once and serve [`PrometheusMetrics::gather`]
//! (or [`PrometheusMetrics::encode_text`]) from whatever HTTP stack the host uses.
//!
//! ```rust,no_run
//! use zpm_core::{ManagerConfig, ProcessManager};
//! use zpm_prometheus::PrometheusMetrics;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ProcessManager::new(ManagerConfig::default());
//! let metrics = PrometheusMetrics::new()?;
//! metrics.install(&manager);
//!
//! let body = metrics.encode_text()?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```
//!
//! ## Metrics
//! - `zpm_jobs_completed_total{command, state}`: counter
//! - `zpm_job_duration_seconds{command}`: histogram of the last attempt
//! - `zpm_stat_value{key, op, id}`: gauge, last statsd value
//! - `zpm_stat_samples_total{key, op}`: counter

mod backend;
pub use backend::PrometheusMetrics;

mod error;
pub use error::MetricsError;

pub use prometheus::{Encoder, Registry, TextEncoder};
