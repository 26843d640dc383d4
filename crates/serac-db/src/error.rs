//! Database error type.

use thiserror::Error;

/// Result alias for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Errors surfaced by the database layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// The database has been closed.
    #[error("database closed")]
    Closed,

    /// The requested key was not found.
    #[error("key not found")]
    NotFound,

    /// Stored bytes could not be decoded.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Backend-specific failure.
    #[error("io error: {0}")]
    Io(String),
}
