//! # Estimate Errors

use thiserror::Error;

/// Result type for estimate operations
pub type EstimateResult<T> = Result<T, EstimateError>;

/// Estimate intake errors. Everything except `Io` and `Provider` is
/// per-row: the sanitizer records it and drops the row.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EstimateError {
    #[error("Cannot resolve {0}")]
    SchemaResolution(String),

    #[error("Column name {column} matches several tables: {tables}")]
    Ambiguous { column: String, tables: String },

    #[error("Malformed estimate for {label}: {message}")]
    Parse { label: String, message: String },

    #[error("No statistics populated for {0}")]
    NoStatistics(String),

    #[error("Duplicate estimate for {0}")]
    Duplicate(String),

    #[error("Cannot read estimates: {0}")]
    Io(String),

    #[error("Estimate provider failed: {0}")]
    Provider(String),
}

impl EstimateError {
    pub fn code(&self) -> &'static str {
        match self {
            EstimateError::SchemaResolution(_) => "STATBENCH_ESTIMATE_SCHEMA_RESOLUTION",
            EstimateError::Ambiguous { .. } => "STATBENCH_ESTIMATE_AMBIGUOUS",
            EstimateError::Parse { .. } => "STATBENCH_ESTIMATE_PARSE",
            EstimateError::NoStatistics(_) => "STATBENCH_ESTIMATE_NO_STATISTICS",
            EstimateError::Duplicate(_) => "STATBENCH_ESTIMATE_DUPLICATE",
            EstimateError::Io(_) => "STATBENCH_ESTIMATE_IO",
            EstimateError::Provider(_) => "STATBENCH_ESTIMATE_PROVIDER",
        }
    }

    /// Row-level errors that only drop one estimate
    pub fn is_row_level(&self) -> bool {
        !matches!(self, EstimateError::Io(_) | EstimateError::Provider(_))
    }
}

impl From<std::io::Error> for EstimateError {
    fn from(e: std::io::Error) -> Self {
        EstimateError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for EstimateError {
    fn from(e: serde_json::Error) -> Self {
        EstimateError::Provider(format!("invalid estimate document: {}", e))
    }
}
