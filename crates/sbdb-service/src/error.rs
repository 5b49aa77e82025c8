//! Service error types

use thiserror::Error;

/// Failure of a single completion request. Affects only the lookup result
/// it was issued for.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    #[error("Completion request rejected: {0}")]
    Rejected(String),

    #[error("Completion service failed: {0}")]
    Failed(String),

    #[error("Completion reply dropped before finishing")]
    Dropped,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service is not running")]
    NotInitialized,

    #[error("Database could not be opened: {0}")]
    DbOpen(String),

    #[error("Invalid update state: {0}")]
    InvalidState(&'static str),

    #[error("Update canceled")]
    UpdateCanceled,

    #[error("Parse error: {0}")]
    Parse(#[from] sbdb_updater::ParseError),

    #[error("Database reset failed: {0}")]
    ResetFailed(String),

    #[error(transparent)]
    Core(#[from] sbdb_core::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
