mod arguments;
pub use arguments::{Arguments, ArgumentsError};

mod command;
pub use command::{Command, JobFlags};

mod job_state;
pub use job_state::JobState;

mod job_result;
pub use job_result::{JobResult, Streams};

mod level;
pub use level::{Level, Meta};

mod message;
pub use message::Message;

mod stat;
pub use stat::{Stat, StatOp};

mod startup;
pub use startup::{DEFAULT_RUNNING_DELAY, Startup, StartupSlice};

pub mod secs;

/// Identifier of a job (unique among currently tracked jobs).
pub type JobId = String;

/// Name of a serialization group; jobs sharing it run one at a time, in order.
pub type QueueName = String;
