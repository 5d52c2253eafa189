//! Process-manager handlers that forward job output and outcomes to `tracing`.

use std::{collections::HashSet, sync::Arc};

use tracing::{debug, error, info, warn};
use zpm_core::{MessageHandler, ProcessManager, ResultHandler};
use zpm_model::{Command, JobResult, JobState, Level, Message};

/// Logs process output whose level is in a configured set.
#[derive(Debug, Clone)]
pub struct MessageLog {
    levels: HashSet<Level>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new([
            Level::STDOUT,
            Level::STDERR,
            Level::WARNING,
            Level::OPS_ERROR,
            Level::CRITICAL,
        ])
    }
}

impl MessageLog {
    pub fn new(levels: impl IntoIterator<Item = Level>) -> Self {
        Self {
            levels: levels.into_iter().collect(),
        }
    }

    #[inline]
    pub fn accepts(&self, level: Level) -> bool {
        self.levels.contains(&level)
    }

    pub fn log(&self, cmd: &Command, msg: &Message) {
        let level = msg.level();
        if !self.accepts(level) {
            return;
        }

        let id = cmd.id.as_str();
        let command = cmd.command.as_str();
        let text = msg.message.as_str();
        match level {
            Level::CRITICAL | Level::OPS_ERROR => {
                error!(target: "zpm.job.output", id, command, %level, "{text}")
            }
            Level::STDERR | Level::WARNING => {
                warn!(target: "zpm.job.output", id, command, %level, "{text}")
            }
            Level::DEBUG => debug!(target: "zpm.job.output", id, command, %level, "{text}"),
            _ => info!(target: "zpm.job.output", id, command, %level, "{text}"),
        }
    }

    pub fn into_handler(self) -> MessageHandler {
        Arc::new(move |cmd: &Command, msg: &Message| self.log(cmd, msg))
    }

    /// Registers this filter as a message handler of `manager`.
    pub fn install(self, manager: &ProcessManager) {
        manager.add_message_handler(self.into_handler());
    }
}

/// Logs the terminal state of a job.
pub fn log_result(cmd: &Command, result: &JobResult) {
    let id = result.id.as_str();
    let command = cmd.command.as_str();
    let state = result.state.as_label();
    let time_ms = result.time;

    match result.state {
        JobState::Success | JobState::Killed => {
            info!(target: "zpm.job.result", id, command, state, time_ms, "job finished")
        }
        JobState::Error | JobState::Timeout => warn!(
            target: "zpm.job.result",
            id,
            command,
            state,
            time_ms,
            critical = %result.critical,
            stderr = %result.streams.stderr(),
            "job failed"
        ),
        JobState::UnknownCommand | JobState::DuplicateId => {
            warn!(target: "zpm.job.result", id, command, state, "job rejected")
        }
    }
}

/// [`log_result`] as a result handler.
pub fn result_logger() -> ResultHandler {
    Arc::new(log_result)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::Value;
    use zpm_core::ManagerConfig;

    #[test]
    fn default_levels_skip_results_and_stats() {
        let log = MessageLog::default();
        assert!(log.accepts(Level::STDOUT));
        assert!(log.accepts(Level::CRITICAL));
        assert!(!log.accepts(Level::RESULT_JSON));
        assert!(!log.accepts(Level::STATSD));
    }

    #[test]
    fn custom_levels_replace_defaults() {
        let log = MessageLog::new([Level::DEBUG]);
        assert!(log.accepts(Level::DEBUG));
        assert!(!log.accepts(Level::STDOUT));
    }

    #[test]
    fn every_state_is_loggable() {
        let cmd = Command::new("core.ping").with_id("job-1");
        for state in [
            JobState::Success,
            JobState::Error,
            JobState::Timeout,
            JobState::Killed,
            JobState::UnknownCommand,
            JobState::DuplicateId,
        ] {
            log_result(&cmd, &JobResult::new(&cmd, state));
        }
    }

    #[tokio::test]
    async fn handlers_plug_into_the_manager() {
        let pm = zpm_core::ProcessManager::new(ManagerConfig {
            restart_delay: Duration::ZERO,
            ..Default::default()
        });
        MessageLog::default().install(&pm);
        pm.add_result_handler(result_logger());
        pm.register_builtin(
            "core.ping",
            Arc::new(|_: &Command| -> anyhow::Result<Value> { Ok(Value::String("pong".into())) }),
        );

        let result = pm.run(Command::new("core.ping"), vec![]).unwrap().wait().await;
        assert_eq!(result.state, JobState::Success);
        assert_eq!(result.data, r#""pong""#);
    }
}
