//! # Experiment Errors

use thiserror::Error;

use crate::session::SessionError;
use crate::strategy::StrategyError;

/// Result type for experiment operations
pub type ExperimentResult<T> = Result<T, ExperimentError>;

/// Experiment-level failures. Every one of them ends the experiment in
/// FAILURE; teardown still runs.
#[derive(Debug, Clone, Error)]
pub enum ExperimentError {
    #[error("Invalid experiment configuration: {0}")]
    Config(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(#[source] SessionError),

    #[error("Query failed in trial {trial}: {source}")]
    QueryExecution {
        trial: usize,
        #[source]
        source: SessionError,
    },

    #[error("Statistics application failed: {0}")]
    StatsApplication(#[source] StrategyError),

    #[error("Unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error("Cancelled after {completed} trials")]
    Cancelled { completed: usize },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Experiment record is already {0}")]
    RecordSealed(String),
}

impl ExperimentError {
    pub fn code(&self) -> &'static str {
        match self {
            ExperimentError::Config(_) => "STATBENCH_EXPERIMENT_CONFIG",
            ExperimentError::Provisioning(_) => "STATBENCH_EXPERIMENT_PROVISIONING",
            ExperimentError::QueryExecution { source, .. } if source.is_timeout() => {
                "STATBENCH_EXPERIMENT_QUERY_TIMEOUT"
            }
            ExperimentError::QueryExecution { .. } => "STATBENCH_EXPERIMENT_QUERY_EXECUTION",
            ExperimentError::StatsApplication(_) => "STATBENCH_EXPERIMENT_STATS_APPLICATION",
            ExperimentError::UnknownStrategy(_) => "STATBENCH_EXPERIMENT_UNKNOWN_STRATEGY",
            ExperimentError::Cancelled { .. } => "STATBENCH_EXPERIMENT_CANCELLED",
            ExperimentError::Session(_) => "STATBENCH_EXPERIMENT_SESSION",
            ExperimentError::Ledger(_) => "STATBENCH_EXPERIMENT_LEDGER",
            ExperimentError::RecordSealed(_) => "STATBENCH_EXPERIMENT_RECORD_SEALED",
        }
    }

    /// A trial statement hit the statement timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExperimentError::QueryExecution { source, .. } if source.is_timeout())
    }
}

impl From<StrategyError> for ExperimentError {
    fn from(e: StrategyError) -> Self {
        match e {
            StrategyError::UnknownStrategy(id) => ExperimentError::UnknownStrategy(id),
            StrategyError::InvalidSettings(msg) => ExperimentError::Config(msg),
            other => ExperimentError::StatsApplication(other),
        }
    }
}

impl From<std::io::Error> for ExperimentError {
    fn from(e: std::io::Error) -> Self {
        ExperimentError::Ledger(e.to_string())
    }
}

impl From<serde_json::Error> for ExperimentError {
    fn from(e: serde_json::Error) -> Self {
        ExperimentError::Ledger(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_typed() {
        let err = ExperimentError::QueryExecution {
            trial: 2,
            source: SessionError::Timeout("canceling statement due to statement timeout".into()),
        };
        assert!(err.is_timeout());
        assert_eq!(err.code(), "STATBENCH_EXPERIMENT_QUERY_TIMEOUT");

        let err = ExperimentError::QueryExecution {
            trial: 1,
            source: SessionError::sql("42601", "syntax error"),
        };
        assert!(!err.is_timeout());
        assert_eq!(err.code(), "STATBENCH_EXPERIMENT_QUERY_EXECUTION");
    }

    #[test]
    fn test_strategy_errors_map() {
        assert!(matches!(
            ExperimentError::from(StrategyError::UnknownStrategy("x".into())),
            ExperimentError::UnknownStrategy(_)
        ));
        assert!(matches!(
            ExperimentError::from(StrategyError::Session(SessionError::Connection("x".into()))),
            ExperimentError::StatsApplication(_)
        ));
    }
}
