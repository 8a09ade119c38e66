//! CLI-specific error types and exit code mapping

use siemlite_core::error::SiemError;
use siemlite_log_pipeline::LogPipelineError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required log source failed preflight.
    #[error("preflight failed: {0}")]
    Preflight(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// `validate-events` found records that do not match the schema.
    #[error("{invalid} of {total} event records are invalid")]
    InvalidEvents { invalid: usize, total: usize },

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from siemlite-core.
    #[error("{0}")]
    Core(SiemError),

    /// Log pipeline domain error.
    #[error("pipeline error: {0}")]
    Pipeline(LogPipelineError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                                  |
    /// |------|------------------------------------------|
    /// | 0    | Success                                  |
    /// | 1    | Configuration, preflight or command error |
    /// | 2    | Invalid event records                    |
    /// | 10   | IO error                                 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidEvents { .. } => 2,
            Self::Io(_) => 10,
            Self::Config(_)
            | Self::Preflight(_)
            | Self::Command(_)
            | Self::JsonSerialize(_)
            | Self::Core(_)
            | Self::Pipeline(_) => 1,
        }
    }
}

impl From<SiemError> for CliError {
    fn from(e: SiemError) -> Self {
        match e {
            SiemError::Config(inner) => Self::Config(inner.to_string()),
            other => Self::Core(other),
        }
    }
}

impl From<LogPipelineError> for CliError {
    fn from(e: LogPipelineError) -> Self {
        match e {
            LogPipelineError::CoreConfig(_) | LogPipelineError::Config { .. } => {
                Self::Config(e.to_string())
            }
            other => Self::Pipeline(other),
        }
    }
}
