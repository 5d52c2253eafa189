use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{Command, JobId, JobState, Level};

/// Buffered output of a run: `(stdout, stderr)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streams(pub String, pub String);

impl Streams {
    pub fn stdout(&self) -> &str {
        &self.0
    }

    pub fn stderr(&self) -> &str {
        &self.1
    }
}

/// Outcome of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: JobId,
    /// Factory key of the command that produced this result.
    pub command: String,
    /// Payload of the last result-level message (or the spawn error).
    #[serde(default)]
    pub data: String,
    /// Level of the message `data` was taken from.
    #[serde(default)]
    pub level: Level,
    pub state: JobState,
    /// Milliseconds since the UNIX epoch.
    #[serde(rename = "starttime")]
    pub start_time: i64,
    /// Run duration in milliseconds.
    pub time: i64,
    #[serde(default)]
    pub streams: Streams,
    /// Last critical-level message.
    #[serde(default)]
    pub critical: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl JobResult {
    /// Creates an empty result for `cmd` in the given state.
    pub fn new(cmd: &Command, state: JobState) -> Self {
        Self {
            id: cmd.id.clone(),
            command: cmd.command.clone(),
            data: String::new(),
            level: Level::NONE,
            state,
            start_time: 0,
            time: 0,
            streams: Streams::default(),
            critical: String::new(),
            tags: cmd.tags.clone(),
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Records the run window.
    pub fn stamp(&mut self, started: SystemTime, elapsed: Duration) {
        self.start_time = epoch_millis(started);
        self.time = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);
    }
}

/// Milliseconds between the UNIX epoch and `t` (zero for earlier times).
pub(crate) fn epoch_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_result_copies_identity_and_tags() {
        let cmd = Command::new("core.ping").with_id("a").with_tags(["x", "y"]);
        let res = JobResult::new(&cmd, JobState::Success).with_data("pong");

        assert_eq!(res.id, "a");
        assert_eq!(res.command, "core.ping");
        assert_eq!(res.data, "pong");
        assert_eq!(res.tags, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn stamp_records_millis() {
        let cmd = Command::new("c").with_id("a");
        let mut res = JobResult::new(&cmd, JobState::Error);
        res.stamp(UNIX_EPOCH + Duration::from_secs(2), Duration::from_millis(1500));
        assert_eq!(res.start_time, 2000);
        assert_eq!(res.time, 1500);
    }

    #[test]
    fn serde_roundtrip_uses_wire_names() {
        let cmd = Command::new("c").with_id("a");
        let mut res = JobResult::new(&cmd, JobState::Timeout);
        res.streams = Streams("out\n".into(), "err\n".into());

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains(r#""starttime":0"#));
        assert!(json.contains(r#""streams":["out\n","err\n"]"#));

        let back: JobResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, res);
    }
}
