//! Executable units supervised by a [`Job`](crate::Job).
//!
//! A [`Process`] is created fresh by its [`ProcessFactory`] for every run
//! attempt. `run` starts it and returns the channel of classified messages;
//! the channel ends with exactly one exit-flagged message and then closes.

mod internal;
pub use internal::{Builtin, BuiltinWithCtx, Context, InternalProcess};

use std::sync::Arc;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use zpm_model::{Command, Message};

use crate::{CoreError, PidTable};

/// CPU and memory usage of a process tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessStats {
    /// CPU usage in percent (may exceed 100 on multi-core hosts).
    pub cpu: f64,
    /// Resident set size in bytes.
    pub rss: u64,
    /// Virtual memory size in bytes.
    pub vms: u64,
    /// Swapped-out memory in bytes.
    pub swap: u64,
}

/// One executable attempt of a command.
pub trait Process: Send + Sync {
    fn command(&self) -> &Command;

    /// Starts the process and returns its message channel.
    ///
    /// Errors mean nothing was started; they are never retried.
    fn run(&self) -> Result<mpsc::Receiver<Message>, CoreError>;

    /// Delivers `sig` to the process.
    fn signal(&self, _sig: Signal) -> Result<(), CoreError> {
        Err(CoreError::NotSignalable)
    }

    /// Samples resource usage, `None` when unsupported or not running.
    fn stats(&self) -> Option<ProcessStats> {
        None
    }

    /// OS PID once the process has been spawned.
    fn pid(&self) -> Option<i32> {
        None
    }
}

/// Constructor of a [`Process`] for a command.
pub type ProcessFactory = Arc<dyn Fn(Arc<dyn PidTable>, Command) -> Arc<dyn Process> + Send + Sync>;
