use serde::{Deserialize, Serialize};

use crate::{Level, Meta};

/// One classified unit of process output.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Nanoseconds since the UNIX epoch, stamped by the manager on dispatch.
    #[serde(default)]
    pub epoch: i64,
    pub meta: Meta,
    pub message: String,
}

impl Message {
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            epoch: 0,
            meta: Meta::from(level),
            message: message.into(),
        }
    }

    /// Terminal message of a run that exited with status zero.
    pub fn exit_success() -> Self {
        Self {
            epoch: 0,
            meta: Meta::new(Level::NONE, Meta::EXIT_SUCCESS),
            message: String::new(),
        }
    }

    /// Terminal message of a run that failed.
    pub fn exit_error() -> Self {
        Self {
            epoch: 0,
            meta: Meta::new(Level::NONE, Meta::EXIT_ERROR),
            message: String::new(),
        }
    }

    #[inline]
    pub fn level(&self) -> Level {
        self.meta.level()
    }
}
