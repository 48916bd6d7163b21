//! # Strategy Errors

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::estimate::EstimateError;
use crate::session::SessionError;

/// Result type for strategy operations
pub type StrategyResult<T> = Result<T, StrategyError>;

#[derive(Debug, Clone, Error)]
pub enum StrategyError {
    #[error("Invalid strategy settings: {0}")]
    InvalidSettings(String),

    #[error("Unknown strategy '{0}'")]
    UnknownStrategy(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),
}

impl StrategyError {
    pub fn code(&self) -> &'static str {
        match self {
            StrategyError::InvalidSettings(_) => "STATBENCH_STRATEGY_INVALID_SETTINGS",
            StrategyError::UnknownStrategy(_) => "STATBENCH_STRATEGY_UNKNOWN",
            StrategyError::Session(e) => e.code(),
            StrategyError::Catalog(e) => e.code(),
            StrategyError::Estimate(e) => e.code(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        StrategyError::InvalidSettings(msg.into())
    }
}
