//! Fetch Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A fetch error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for fetch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Release document does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Path is not usable as a release location (relative, not UTF-8, ...)
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error")]
    Io,
    /// The upstream source could not be reached or answered with garbage.
    #[display("upstream unavailable: {_0}")]
    Unavailable(#[error(not(source))] String),
    /// An external command (e.g. a build) failed to run or exited unsuccessfully.
    #[display("command failed: {_0}")]
    Command(#[error(not(source))] String),
    /// The upstream returned something that can't be used as a release identifier.
    #[display("invalid release identifier")]
    InvalidRelease,
    /// The operation observed the cancellation signal.
    #[display("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Unavailable(_) | Self::Command(_))
    }
}
