//! Error handling for the agent.
//!
//! This module defines the main error type `AgentError` used throughout the
//! crate, along with a convenient type alias and conversion implementations.

use crate::db::error::DbError;
use thiserror::Error;

/// The main error type for the agent.
///
/// Every component boundary (Analyzer, Translator, Planner, Executor,
/// Controller, Harness) converts its internal failures into this enum
/// rather than panicking.
#[derive(Error, Debug)]
pub enum AgentError {
    /// An error that occurred during database operations.
    #[error("database error: {0}")]
    Database(String),

    /// An error that occurred during JSON serialization or deserialization.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error that occurred during I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred during configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error that occurred while parsing an EXPLAIN plan.
    #[error("execution plan error: {0}")]
    PlanError(String),

    /// An error that occurred due to an invalid or unparseable query.
    #[error("query error: {0}")]
    InvalidQuery(String),

    /// The Planner could not produce a usable Action from a response.
    /// Always terminal for the current task.
    #[error("planner error: {0}")]
    Planner(String),

    /// A per-task or per-statement budget was exceeded.
    #[error("timeout: {0}")]
    Timeout(String),
}

impl From<sqlx::Error> for AgentError {
    fn from(err: sqlx::Error) -> Self {
        AgentError::Database(err.to_string())
    }
}

impl From<DbError> for AgentError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Connection(msg) => AgentError::Database(msg),
            DbError::Query(msg) => AgentError::Database(msg),
            DbError::Json(e) => AgentError::Json(e),
            DbError::Io(e) => AgentError::Io(e),
            DbError::Config(msg) => AgentError::Config(msg),
            DbError::PlanError(msg) => AgentError::PlanError(msg),
            DbError::InvalidQuery(msg) => AgentError::InvalidQuery(msg),
            DbError::Timeout(msg) => AgentError::Timeout(msg),
        }
    }
}

/// A specialized `Result` type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
