//! Indexer Error Types
//!
//! Every per-index failure is raised into one of these kinds, with the
//! fetcher's or store's own error kept underneath in the error tree.

use derive_more::{Display, Error};

/// An indexer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// No fetcher is registered under this name.
    #[display("unknown index: {_0}")]
    UnknownIndex(#[error(not(source))] String),
    #[display("could not get the latest release")]
    Fetch,
    #[display("could not download the latest release")]
    Download,
    #[display("could not index packages")]
    Store,
    #[display("could not access index metadata")]
    Metadata,
    #[display("could not access the package list")]
    Keys,
    #[display("indexing cancelled")]
    Cancelled,
    /// The worker task panicked or was aborted.
    #[display("indexing worker failed")]
    Worker,
    #[display("could not decode package record")]
    Decode,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch | Self::Download)
    }
}
