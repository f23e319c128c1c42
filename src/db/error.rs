//! Database error types for the agent's database layer.
//!
//! This module defines the error types used throughout the `db` module.

use serde_json::Error as JsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use thiserror::Error;

/// Represents errors that can occur during database operations.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to establish a database connection
    #[error("database connection error: {0}")]
    Connection(String),

    /// Error occurred while executing a query
    #[error("query execution error: {0}")]
    Query(String),

    /// Error occurred during JSON serialization/deserialization
    #[error("JSON parsing error: {0}")]
    Json(#[from] JsonError),

    /// I/O related error
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Configuration related error
    #[error("configuration error: {0}")]
    Config(String),

    /// Error occurred while parsing an execution plan
    #[error("execution plan error: {0}")]
    PlanError(String),

    /// The provided SQL query is invalid
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A statement exceeded its per-statement timeout.
    #[error("statement timeout: {0}")]
    Timeout(String),
}

impl From<SqlxError> for DbError {
    /// Converts a SQLx error into a database error
    fn from(err: SqlxError) -> Self {
        match err {
            SqlxError::Io(io_err) => DbError::Io(io_err),
            SqlxError::Configuration(config_err) => DbError::Config(config_err.to_string()),
            SqlxError::PoolTimedOut => DbError::Timeout(err.to_string()),
            _ => DbError::Query(err.to_string()),
        }
    }
}

/// Convenience type for Results that use DbError.
pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_error_message_includes_detail() {
        let err = DbError::Timeout("EXPLAIN ANALYZE exceeded 5000ms".to_string());
        assert!(err.to_string().contains("5000ms"));
    }
}
