use std::sync::Arc;

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};
use tracing::debug;
use zpm_core::ProcessManager;
use zpm_model::{Command, JobResult, Stat};

use crate::MetricsError;

const NAMESPACE: &str = "zpm";

/// Job outcome and statsd metrics on a dedicated [`Registry`].
///
/// Cloning shares the underlying collectors.
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    completed: IntCounterVec,
    duration: HistogramVec,
    stat_value: GaugeVec,
    stat_samples: IntCounterVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        Self::with_registry(Registry::new())
    }

    /// Registers the collectors on an existing registry.
    pub fn with_registry(registry: Registry) -> Result<Self, MetricsError> {
        let completed = IntCounterVec::new(
            Opts::new("jobs_completed_total", "Terminal job results by state").namespace(NAMESPACE),
            &["command", "state"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new("job_duration_seconds", "Duration of the last attempt of a job")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 1800.0]),
            &["command"],
        )?;
        let stat_value = GaugeVec::new(
            Opts::new("stat_value", "Last statsd value reported by a job").namespace(NAMESPACE),
            &["key", "op", "id"],
        )?;
        let stat_samples = IntCounterVec::new(
            Opts::new("stat_samples_total", "Statsd samples received").namespace(NAMESPACE),
            &["key", "op"],
        )?;

        registry.register(Box::new(completed.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(stat_value.clone()))?;
        registry.register(Box::new(stat_samples.clone()))?;

        Ok(Self {
            registry,
            completed,
            duration,
            stat_value,
            stat_samples,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_result(&self, cmd: &Command, result: &JobResult) {
        let command = cmd.command.as_str();
        self.completed
            .with_label_values(&[command, result.state.as_label()])
            .inc();
        if !result.state.is_rejection() {
            self.duration
                .with_label_values(&[command])
                .observe(result.time.max(0) as f64 / 1000.0);
        }
    }

    pub fn observe_stat(&self, stat: &Stat) {
        let op = stat.op.as_str();
        self.stat_value
            .with_label_values(&[stat.key.as_str(), op, stat.id.as_str()])
            .set(stat.value);
        self.stat_samples.with_label_values(&[stat.key.as_str(), op]).inc();
    }

    /// Adds this backend as a result and stats handler of `manager`.
    pub fn install(&self, manager: &ProcessManager) {
        let results = self.clone();
        manager.add_result_handler(Arc::new(move |cmd: &Command, result: &JobResult| {
            results.observe_result(cmd, result)
        }));
        let stats = self.clone();
        manager.add_stats_handler(Arc::new(move |stat: &Stat| stats.observe_stat(stat)));
        debug!(target: "zpm.prometheus", "metrics handlers installed");
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Renders all metrics in the text exposition format.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
