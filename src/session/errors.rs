//! # Session Errors

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Database session errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Statement timed out: {0}")]
    Timeout(String),

    #[error("SQL error [{sqlstate}]: {message}")]
    Sql { sqlstate: String, message: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Unexpected result: {0}")]
    Protocol(String),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),
}

impl SessionError {
    pub fn sql(sqlstate: &str, message: impl Into<String>) -> Self {
        SessionError::Sql {
            sqlstate: sqlstate.to_string(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SessionError::Connection(_) => "STATBENCH_SESSION_CONNECTION",
            SessionError::Timeout(_) => "STATBENCH_SESSION_TIMEOUT",
            SessionError::Sql { .. } => "STATBENCH_SESSION_SQL",
            SessionError::InvalidIdentifier(_) => "STATBENCH_SESSION_INVALID_IDENTIFIER",
            SessionError::Protocol(_) => "STATBENCH_SESSION_PROTOCOL",
            SessionError::Provisioning(_) => "STATBENCH_SESSION_PROVISIONING",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout(_))
    }

    /// Errors after which the session cannot be used any more
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, SessionError::Connection(_))
    }

    /// SQLSTATE of a server error
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            SessionError::Sql { sqlstate, .. } => Some(sqlstate),
            SessionError::Timeout(_) => Some(SqlState::QUERY_CANCELED.code()),
            _ => None,
        }
    }
}

impl From<tokio_postgres::Error> for SessionError {
    fn from(e: tokio_postgres::Error) -> Self {
        if let Some(db) = e.as_db_error() {
            if db.code() == &SqlState::QUERY_CANCELED {
                return SessionError::Timeout(db.message().to_string());
            }
            return SessionError::sql(db.code().code(), db.message());
        }
        if e.is_closed() {
            return SessionError::Connection("connection closed".to_string());
        }
        SessionError::Connection(e.to_string())
    }
}
