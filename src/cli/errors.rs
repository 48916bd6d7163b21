//! CLI-specific error types
//!
//! All CLI errors end the process with a non-zero exit code.

use std::fmt;
use std::io;

use crate::estimate::EstimateError;
use crate::experiment::ExperimentError;
use crate::session::SessionError;
use crate::strategy::StrategyError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// I/O error (files, stdout)
    IoError,
    /// Async runtime could not start
    RuntimeError,
    /// Database unreachable or statement failed
    SessionError,
    /// Experiment finished in FAILURE
    ExperimentFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "STATBENCH_CLI_CONFIG_ERROR",
            Self::IoError => "STATBENCH_CLI_IO_ERROR",
            Self::RuntimeError => "STATBENCH_CLI_RUNTIME_ERROR",
            Self::SessionError => "STATBENCH_CLI_SESSION_ERROR",
            Self::ExperimentFailed => "STATBENCH_CLI_EXPERIMENT_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Config error
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    /// I/O error
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn runtime_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::RuntimeError, msg)
    }

    pub fn experiment_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ExperimentFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ExperimentError> for CliError {
    fn from(e: ExperimentError) -> Self {
        match e {
            ExperimentError::Config(msg) => Self::config_error(msg),
            other => Self::experiment_failed(format!("{} ({})", other, other.code())),
        }
    }
}

impl From<StrategyError> for CliError {
    fn from(e: StrategyError) -> Self {
        Self::config_error(format!("{} ({})", e, e.code()))
    }
}

impl From<EstimateError> for CliError {
    fn from(e: EstimateError) -> Self {
        Self::config_error(format!("{} ({})", e, e.code()))
    }
}

impl From<SessionError> for CliError {
    fn from(e: SessionError) -> Self {
        Self::new(CliErrorCode::SessionError, format!("{} ({})", e, e.code()))
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_code() {
        let e = CliError::config_error("iterations must be >= 1");
        assert_eq!(e.code_str(), "STATBENCH_CLI_CONFIG_ERROR");
        assert_eq!(
            e.to_string(),
            "STATBENCH_CLI_CONFIG_ERROR: iterations must be >= 1"
        );
    }

    #[test]
    fn test_conversions() {
        let e: CliError = ExperimentError::Config("bad".into()).into();
        assert_eq!(e.code(), &CliErrorCode::ConfigError);

        let e: CliError = SessionError::Connection("refused".into()).into();
        assert_eq!(e.code(), &CliErrorCode::SessionError);
        assert!(e.message().contains("STATBENCH_SESSION_CONNECTION"));
    }
}
