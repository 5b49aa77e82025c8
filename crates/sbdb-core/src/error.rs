//! Error types for sbdb-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Invalid table name: {0:?}")]
    InvalidTableName(String),

    #[error("Invalid chunk list: {0:?}")]
    InvalidChunkList(String),

    #[error("Store for table {table} could not be opened: {reason}")]
    StoreOpen { table: String, reason: String },

    #[error("Store for table {table} could not be committed: {reason}")]
    StoreCommit { table: String, reason: String },

    #[error("Store for table {table} could not be removed: {reason}")]
    StoreRemove { table: String, reason: String },
}
