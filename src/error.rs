//! Error types for tlogkv
//!
//! One error type covers construction, replay and append failures. Append
//! failures never reach the caller directly; they travel on the logger's
//! error stream as values of this type.

use thiserror::Error;

/// Result type alias using TlogError
pub type Result<T> = std::result::Result<T, TlogError>;

/// Unified error type for tlogkv operations
#[derive(Debug, Error)]
pub enum TlogError {
    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    // -------------------------------------------------------------------------
    // Replay Errors
    // -------------------------------------------------------------------------
    #[error("log corruption at line {line}: {reason}")]
    Corruption { line: u64, reason: String },

    #[error("transaction number out of sequence: {last} >= {found}")]
    SequenceViolation { last: u64, found: u64 },

    #[error("invalid row {sequence} in transactions table: {reason}")]
    InvalidRow { sequence: i64, reason: String },

    // -------------------------------------------------------------------------
    // Event Errors
    // -------------------------------------------------------------------------
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("transaction logger is not active; call activate() before appending")]
    NotActive,

    #[error("transaction logger is shut down")]
    Closed,

    #[error("invalid logger state: {0}")]
    InvalidState(String),

    #[error("append worker panicked")]
    WorkerPanicked,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("configuration error: {0}")]
    Config(String),
}
