//! # Process manager configuration.
//!
//! [`ManagerConfig`] is read once by [`ProcessManager::new`](crate::ProcessManager::new)
//! and shared by every job the manager runs.
//!
//! ## Sentinel values
//! - `max_jobs = 0` → unlimited admission
//! - `stats_interval = 0s` → process meter disabled
//!
//! Durations are (de)serialized as whole seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zpm_model::secs;

/// Runtime settings of the process manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of dispatched jobs running at once (`0` = unlimited).
    ///
    /// Jobs started with [`ProcessManager::run`](crate::ProcessManager::run)
    /// bypass admission and are not counted.
    pub max_jobs: usize,

    /// Ring capacity for buffered stdout and stderr lines of a single run.
    pub stdout_buffer: usize,

    /// Ring capacity of the message backlog replayed to late subscribers.
    pub backlog_buffer: usize,

    /// Pause before a failed job is retried under `max_restart`.
    #[serde(with = "secs")]
    pub restart_delay: Duration,

    /// Period of the hook tick.
    #[serde(with = "secs")]
    pub tick: Duration,

    /// Default period of the process meter; a command may override it.
    #[serde(with = "secs")]
    pub stats_interval: Duration,

    /// Capacity of the immediate and ready dispatch channels (min 1).
    pub submit_capacity: usize,
}

impl ManagerConfig {
    /// Returns the admission limit as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → at most `n` dispatched jobs run simultaneously
    #[inline]
    pub fn concurrency_limit(&self) -> Option<usize> {
        if self.max_jobs == 0 {
            None
        } else {
            Some(self.max_jobs)
        }
    }

    /// Returns the default meter period, `None` when disabled.
    #[inline]
    pub fn default_stats_interval(&self) -> Option<Duration> {
        if self.stats_interval.is_zero() {
            None
        } else {
            Some(self.stats_interval)
        }
    }

    /// Tick period clamped to a minimum of 10ms.
    #[inline]
    pub fn tick_clamped(&self) -> Duration {
        self.tick.max(Duration::from_millis(10))
    }

    #[inline]
    pub fn submit_capacity_clamped(&self) -> usize {
        self.submit_capacity.max(1)
    }

    #[inline]
    pub fn stdout_buffer_clamped(&self) -> usize {
        self.stdout_buffer.max(1)
    }

    #[inline]
    pub fn backlog_buffer_clamped(&self) -> usize {
        self.backlog_buffer.max(1)
    }
}

impl Default for ManagerConfig {
    /// Default configuration:
    ///
    /// - `max_jobs = 100`
    /// - `stdout_buffer = 1000`, `backlog_buffer = 100`
    /// - `restart_delay = 1s`, `tick = 1s`
    /// - `stats_interval = 30s`
    /// - `submit_capacity = 1`
    fn default() -> Self {
        Self {
            max_jobs: 100,
            stdout_buffer: 1000,
            backlog_buffer: 100,
            restart_delay: Duration::from_secs(1),
            tick: Duration::from_secs(1),
            stats_interval: Duration::from_secs(30),
            submit_capacity: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sentinels() {
        let cfg = ManagerConfig {
            max_jobs: 0,
            stats_interval: Duration::ZERO,
            submit_capacity: 0,
            ..Default::default()
        };
        assert_eq!(cfg.concurrency_limit(), None);
        assert_eq!(cfg.default_stats_interval(), None);
        assert_eq!(cfg.submit_capacity_clamped(), 1);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: ManagerConfig = serde_json::from_str(r#"{"max_jobs":4,"restart_delay":3}"#).unwrap();
        assert_eq!(cfg.concurrency_limit(), Some(4));
        assert_eq!(cfg.restart_delay, Duration::from_secs(3));
        assert_eq!(cfg.stdout_buffer, 1000);
        assert_eq!(cfg.tick, Duration::from_secs(1));
    }
}
