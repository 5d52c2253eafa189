use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Arguments, domain::secs};

/// Delay after which a still-running service is considered up, when the
/// descriptor asks for the default (`running_delay == 0`).
pub const DEFAULT_RUNNING_DELAY: Duration = Duration::from_secs(2);

/// Descriptor of a service started as part of a dependency-ordered slice.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Startup {
    /// Explicit key; falls back to `name` when empty.
    #[serde(default)]
    pub id: String,
    /// Factory key of the command to run.
    pub name: String,
    /// Keys of the entries that must be up before this one starts.
    #[serde(default)]
    pub after: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Arguments>,
    #[serde(default)]
    pub max_restart: u32,
    #[serde(default, with = "secs", skip_serializing_if = "secs::is_zero")]
    pub recurring_period: Duration,
    #[serde(default)]
    pub protected: bool,
    /// Output substring that marks the service as running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_match: Option<String>,
    /// Seconds after which a live service counts as running.
    /// `< 0` disables the heuristic, `0` means [`DEFAULT_RUNNING_DELAY`].
    #[serde(default)]
    pub running_delay: i64,
}

/// Ordered list of startup descriptors.
pub type StartupSlice = Vec<Startup>;

impl Startup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_after<I, S>(mut self, after: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after = after.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_args(mut self, args: impl Into<Arguments>) -> Self {
        self.args = Some(args.into());
        self
    }

    pub fn with_running_match(mut self, pattern: impl Into<String>) -> Self {
        self.running_match = Some(pattern.into());
        self
    }

    pub fn with_running_delay(mut self, secs: i64) -> Self {
        self.running_delay = secs;
        self
    }

    /// Key under which the entry is released to its dependents.
    pub fn key(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }

    /// Delay heuristic for this entry, `None` when disabled.
    pub fn running_delay(&self) -> Option<Duration> {
        match self.running_delay {
            d if d < 0 => None,
            0 => Some(DEFAULT_RUNNING_DELAY),
            d => Some(Duration::from_secs(d.unsigned_abs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefers_explicit_id() {
        assert_eq!(Startup::new("net.setup").key(), "net.setup");
        assert_eq!(Startup::new("core.system").with_id("sshd").key(), "sshd");
    }

    #[test]
    fn running_delay_sentinels() {
        assert_eq!(Startup::new("a").running_delay(), Some(DEFAULT_RUNNING_DELAY));
        assert_eq!(Startup::new("a").with_running_delay(-1).running_delay(), None);
        assert_eq!(
            Startup::new("a").with_running_delay(5).running_delay(),
            Some(Duration::from_secs(5))
        );
    }

    #[test]
    fn decodes_from_json() {
        let up: Startup = serde_json::from_str(
            r#"{"name":"core.system","id":"redis","after":["net"],"running_match":"ready"}"#,
        )
        .unwrap();
        assert_eq!(up.after, vec!["net".to_string()]);
        assert_eq!(up.running_match.as_deref(), Some("ready"));
        assert_eq!(up.running_delay, 0);
    }
}
