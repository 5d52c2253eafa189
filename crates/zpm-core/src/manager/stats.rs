use zpm_model::{Command, Stat, StatOp};

use crate::{ProcessManager, ProcessStats};

impl ProcessManager {
    /// Publishes one meter sample of a running process.
    pub(crate) fn meter(&self, cmd: &Command, sample: &ProcessStats) {
        for stat in meter_stats(cmd, sample) {
            self.aggregate(&stat);
        }
    }
}

/// Converts a sample into `process.*` average stats keyed by job.
pub(crate) fn meter_stats(cmd: &Command, sample: &ProcessStats) -> [Stat; 4] {
    let stat = |key: &str, value: f64| Stat {
        op: StatOp::Average,
        key: key.to_string(),
        value,
        id: cmd.id.clone(),
        tags: cmd.tags.join(","),
    };

    [
        stat("process.cpu", sample.cpu),
        stat("process.rss", sample.rss as f64),
        stat("process.vms", sample.vms as f64),
        stat("process.swap", sample.swap as f64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_maps_to_average_stats() {
        let cmd = Command::new("core.system").with_id("web").with_tags(["a", "b"]);
        let sample = ProcessStats {
            cpu: 12.5,
            rss: 2048,
            vms: 4096,
            swap: 0,
        };

        let stats = meter_stats(&cmd, &sample);
        let keys: Vec<&str> = stats.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, ["process.cpu", "process.rss", "process.vms", "process.swap"]);
        assert!(stats.iter().all(|s| s.op == StatOp::Average && s.id == "web"));
        assert_eq!(stats[0].value, 12.5);
        assert_eq!(stats[1].value, 2048.0);
        assert_eq!(stats[0].tags, "a,b");
    }
}
