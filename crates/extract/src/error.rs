//! Extraction Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// An extraction error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Offsets are byte positions in the (decompressed) document.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reading from the underlying document failed.
    #[display("I/O error")]
    Io,
    /// The document does not start with a JSON object.
    #[display("document is not a JSON object")]
    NotAnObject,
    /// The outer object ended (or the input ended) before a `"packages"` member.
    #[display("packages field not found")]
    PackagesNotFound,
    /// An object key was not a JSON string.
    #[display("expected a string key at byte {offset}")]
    NonStringKey { offset: u64 },
    /// The document is structurally broken.
    #[display("malformed document at byte {offset}: {reason}")]
    Malformed { offset: u64, reason: &'static str },
    /// The input ended in the middle of a value.
    #[display("unexpected end of document")]
    UnexpectedEof,
    /// A package name could not be decoded as a JSON string.
    #[display("invalid package name at byte {offset}")]
    InvalidName { offset: u64 },
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Only a flaky reader is worth another go. The document is either
        // well-formed or it isn't.
        matches!(self, Self::Io)
    }
}
