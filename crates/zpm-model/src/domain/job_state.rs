use std::fmt;

use serde::{Deserialize, Serialize};

/// Terminal state of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// The process exited with status zero.
    Success,
    /// The process failed, could not be spawned, or the builtin returned an error.
    Error,
    /// The run exceeded `max_time` and was killed.
    Timeout,
    /// The job was explicitly terminated.
    Killed,
    /// No factory is registered for the command.
    #[serde(rename = "UNKNOWN_CMD")]
    UnknownCommand,
    /// Another job with the same ID is still tracked.
    #[serde(rename = "DUPLICATE_ID")]
    DuplicateId,
}

impl JobState {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Success)
    }

    /// Returns `true` for states produced before any process was spawned.
    #[inline]
    pub fn is_rejection(&self) -> bool {
        matches!(self, JobState::UnknownCommand | JobState::DuplicateId)
    }

    /// Returns a short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            JobState::Success => "success",
            JobState::Error => "error",
            JobState::Timeout => "timeout",
            JobState::Killed => "killed",
            JobState::UnknownCommand => "unknown_cmd",
            JobState::DuplicateId => "duplicate_id",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}
