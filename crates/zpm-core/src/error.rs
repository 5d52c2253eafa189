use thiserror::Error;

/// Errors surfaced by the process manager.
#[derive(Error, Debug)]
pub enum CoreError {
    /// No factory is registered under the command name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    /// A factory is already registered under this command name.
    #[error("factory already registered: {0}")]
    DuplicateFactory(String),
    /// A job with this ID is already tracked.
    #[error("duplicate job id: {0}")]
    DuplicateId(String),
    /// The OS-level spawn failed.
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("job not found: {0}")]
    NotFound(String),
    /// The process variant cannot receive signals.
    #[error("process is not signalable")]
    NotSignalable,
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// The manager is shut down or a channel is gone.
    #[error("manager closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Returns a short stable label for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CoreError::UnknownCommand(_) => "unknown_command",
            CoreError::DuplicateFactory(_) => "duplicate_factory",
            CoreError::DuplicateId(_) => "duplicate_id",
            CoreError::Spawn(_) => "spawn",
            CoreError::NotFound(_) => "not_found",
            CoreError::NotSignalable => "not_signalable",
            CoreError::InvalidArguments(_) => "invalid_arguments",
            CoreError::Closed => "closed",
            CoreError::Io(_) => "io",
        }
    }
}

impl From<zpm_model::ArgumentsError> for CoreError {
    fn from(e: zpm_model::ArgumentsError) -> Self {
        CoreError::InvalidArguments(e.to_string())
    }
}
