use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Arguments, JobId, QueueName, domain::secs};

/// Flags that only the in-process API may set.
///
/// They are never read from or written to the wire, so remote callers cannot
/// mark their own commands as protected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobFlags {
    /// Respawn the process immediately whenever it exits.
    pub protected: bool,
    /// Do not forward process output to the global message handlers.
    pub no_output: bool,
}

/// Immutable description of work submitted to the process manager.
///
/// `command` is the key of the process factory that knows how to run it;
/// `arguments` is an opaque payload only that factory interprets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Unique job identifier. A blank ID is replaced by a random UUID on submission.
    #[serde(default)]
    pub id: JobId,
    /// Factory key (e.g. `"core.system"`).
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Arguments>,
    /// Serialization group. Empty means "run as soon as admitted".
    #[serde(default)]
    pub queue: QueueName,
    /// Upper bound of a single run; zero means unbounded.
    #[serde(default, with = "secs", skip_serializing_if = "secs::is_zero")]
    pub max_time: Duration,
    /// Number of attempts when the process keeps failing; zero disables retries.
    #[serde(default)]
    pub max_restart: u32,
    /// Period between runs of a recurring job; zero means one-shot.
    #[serde(default, with = "secs", skip_serializing_if = "secs::is_zero")]
    pub recurring_period: Duration,
    /// Meter period override for process statistics; zero uses the manager default.
    #[serde(default, with = "secs", skip_serializing_if = "secs::is_zero")]
    pub stats_interval: Duration,
    /// Flag every message of this job for live streaming.
    #[serde(default)]
    pub stream: bool,
    /// Routing metadata, copied verbatim into the job result.
    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(skip)]
    pub flags: JobFlags,
}

impl Command {
    /// Creates a command for the given factory key with every policy disabled.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<Arguments>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    pub fn with_queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_max_time(mut self, max_time: Duration) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_max_restart(mut self, max_restart: u32) -> Self {
        self.max_restart = max_restart;
        self
    }

    pub fn with_recurring_period(mut self, period: Duration) -> Self {
        self.recurring_period = period;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn protected(mut self) -> Self {
        self.flags.protected = true;
        self
    }

    /// Assigns a random ID if the command has none.
    pub fn ensure_id(&mut self) -> &str {
        if self.id.is_empty() {
            self.id = uuid::Uuid::new_v4().to_string();
        }
        &self.id
    }

    /// Returns the per-run time limit, `None` when unbounded.
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        (!self.max_time.is_zero()).then_some(self.max_time)
    }

    /// Returns the recurring period, `None` for one-shot jobs.
    #[inline]
    pub fn recurring(&self) -> Option<Duration> {
        (!self.recurring_period.is_zero()).then_some(self.recurring_period)
    }

    #[inline]
    pub fn is_queued(&self) -> bool {
        !self.queue.is_empty()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}# {})", self.id, self.command)
    }
}
