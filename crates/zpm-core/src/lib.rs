//! Process-manager core.
//!
//! Admission, queueing and supervision of commands, the SIGCHLD-driven PID
//! table, and the classification pipeline that turns process output into
//! leveled messages and job results.
//!
//! OS-process variants live in `zpm-exec`; this crate only ships the internal
//! (in-runtime function) process.

pub mod config;
pub use config::ManagerConfig;

mod error;
pub use error::CoreError;

pub mod hooks;
pub use hooks::{DelayHook, ExitHook, Hook, HookRef, MatchHook, PidHook};

pub mod job;
pub use job::Job;

pub mod manager;
pub use manager::{MessageHandler, ProcessManager, ResultHandler, StatsHandler};

pub mod map;

pub mod process;
pub use process::{Context, Process, ProcessFactory, ProcessStats};

pub mod queue;

pub mod reaper;
pub use reaper::{PidTable, SystemPidTable, WaitStatus};

pub mod router;
pub use router::ProcessRouter;

pub mod state;
pub use state::StateMachine;

pub mod stream;

pub mod prelude {
    pub use crate::{
        CoreError, Hook, Job, ManagerConfig, Process, ProcessFactory, ProcessManager,
    };
    pub use zpm_model::{Command, JobResult, JobState, Level, Message, Startup};
}
