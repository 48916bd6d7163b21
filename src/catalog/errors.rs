//! # Catalog Errors

use thiserror::Error;

use super::encoding::EncodingTechnique;
use super::kind::StatsKind;
use crate::session::SessionError;

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Translation and writer errors
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("Column could not be resolved: {0}")]
    UnresolvedColumn(String),

    #[error("No array type for element type {1} of column {0}")]
    MissingElementType(String, String),

    #[error("All slots in use for column {0}")]
    SlotsExhausted(String),

    #[error("Slot kind {1} already allocated for column {0}")]
    DuplicateKind(String, StatsKind),

    #[error("No baseline catalog row for column {0}")]
    MissingBaseline(String),

    #[error("Catalog batch failed at column {column}: {source}")]
    BatchFailed {
        column: String,
        #[source]
        source: SessionError,
    },

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CatalogError {
    pub fn code(&self) -> &'static str {
        match self {
            CatalogError::UnresolvedColumn(_) => "STATBENCH_CATALOG_UNRESOLVED_COLUMN",
            CatalogError::MissingElementType(_, _) => "STATBENCH_CATALOG_MISSING_ELEMENT_TYPE",
            CatalogError::SlotsExhausted(_) => "STATBENCH_CATALOG_SLOTS_EXHAUSTED",
            CatalogError::DuplicateKind(_, _) => "STATBENCH_CATALOG_DUPLICATE_KIND",
            CatalogError::MissingBaseline(_) => "STATBENCH_CATALOG_MISSING_BASELINE",
            CatalogError::BatchFailed { .. } => "STATBENCH_CATALOG_BATCH_FAILED",
            CatalogError::Session(_) => "STATBENCH_CATALOG_SESSION",
        }
    }
}

/// Values-array encoding errors. Recovered per field, never per batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EncodingError {
    #[error("{technique} not applicable: {reason}")]
    NotApplicable {
        technique: EncodingTechnique,
        reason: String,
    },

    #[error("{technique} rejected by server: {message}")]
    Rejected {
        technique: EncodingTechnique,
        message: String,
    },

    #[error("Encoding failure for {column} slot {slot}: {attempts} techniques failed")]
    Exhausted {
        column: String,
        slot: usize,
        attempts: usize,
    },
}

impl EncodingError {
    pub fn code(&self) -> &'static str {
        match self {
            EncodingError::NotApplicable { .. } => "STATBENCH_ENCODING_NOT_APPLICABLE",
            EncodingError::Rejected { .. } => "STATBENCH_ENCODING_REJECTED",
            EncodingError::Exhausted { .. } => "STATBENCH_ENCODING_FAILURE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            CatalogError::MissingBaseline("t.c".into()).code(),
            "STATBENCH_CATALOG_MISSING_BASELINE"
        );
        let err = EncodingError::Exhausted {
            column: "t.c".into(),
            slot: 2,
            attempts: 3,
        };
        assert_eq!(err.code(), "STATBENCH_ENCODING_FAILURE");
        assert!(err.to_string().contains("slot 2"));
    }

    #[test]
    fn test_batch_failure_keeps_source() {
        use std::error::Error as _;
        let err = CatalogError::BatchFailed {
            column: "orders.amount".into(),
            source: SessionError::Connection("closed".into()),
        };
        assert!(err.source().is_some());
    }
}
