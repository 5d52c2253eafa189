use thiserror::Error;
use zpm_core::CoreError;

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("missing program")]
    MissingProgram,
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("io error: {0}")]
    Io(String),
}

impl ExecError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::MissingProgram => "missing_program",
            ExecError::InvalidArguments(_) => "invalid_arguments",
            ExecError::Spawn(_) => "spawn",
            ExecError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        ExecError::Io(e.to_string())
    }
}

impl From<zpm_model::ArgumentsError> for ExecError {
    fn from(e: zpm_model::ArgumentsError) -> Self {
        ExecError::InvalidArguments(e.to_string())
    }
}

impl From<ExecError> for CoreError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::InvalidArguments(msg) => CoreError::InvalidArguments(msg),
            ExecError::Spawn(msg) => CoreError::Spawn(msg),
            other => CoreError::Spawn(other.to_string()),
        }
    }
}

pub type ExecResult<T> = Result<T, ExecError>;
