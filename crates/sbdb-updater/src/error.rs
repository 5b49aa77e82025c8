//! Update stream parse errors

use thiserror::Error;

/// A malformed update stream. Poisons the parse session until `begin()`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed control line: {0:?}")]
    MalformedLine(String),

    #[error("Unsupported hash size {size} in chunk {chunk}")]
    UnsupportedHashSize { chunk: u32, size: usize },

    #[error("Chunk {chunk} length {length} exceeds the {max} byte limit")]
    ChunkTooLarge { chunk: u32, length: usize, max: usize },

    #[error("Chunk {chunk} payload does not match its header: {reason}")]
    PayloadMismatch { chunk: u32, reason: String },

    #[error("{directive} directive before any table was selected")]
    NoTable { directive: String },

    #[error("Invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("Invalid chunk list {list:?}")]
    InvalidChunkList { list: String },

    #[error("Stream ended inside chunk {chunk} ({missing} bytes missing)")]
    TruncatedChunk { chunk: u32, missing: usize },

    #[error("Stream ended with an unterminated line {0:?}")]
    UnterminatedLine(String),
}

pub type Result<T> = std::result::Result<T, ParseError>;
