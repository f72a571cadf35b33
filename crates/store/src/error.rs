//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// Another handle (in this process or another) holds the namespace.
    #[display("store is locked by another handle: {}", _0.display())]
    Locked(#[error(not(source))] PathBuf),
    /// The document could not be read or parsed.
    #[display("could not extract packages from document")]
    Extract,
    /// A package value can't be stored as a record (it isn't a JSON object).
    #[display("invalid package record: {_0}")]
    InvalidRecord(#[error(not(source))] String),
    /// Indexing was cancelled before the commit; nothing was written.
    #[display("indexing cancelled")]
    Cancelled,
    /// Writing the key listing failed.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::Io)
    }
}
