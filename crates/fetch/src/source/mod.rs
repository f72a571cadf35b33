//! Fetcher trait and generic implementations.
//!
//! This module defines the [`Fetcher`] trait, the capability every upstream
//! source exposes to the indexer: "what is the newest release?" and "give me
//! the document for that release". Source-specific scrapers (option pages,
//! S3 listings, GitHub commits) live outside this crate and implement the
//! same trait.

mod command;
mod file;
#[cfg(feature = "mock")]
mod mock;

pub use self::command::CommandFetcher;
pub use self::file::FileFetcher;
#[cfg(feature = "mock")]
pub use self::mock::MockFetcher;
use crate::error::Result;
use crate::models::IndexMetadata;
use async_trait::async_trait;
use std::io::Read;
use tokio_util::sync::CancellationToken;

/// Blocking reader over a release document.
///
/// Parsing a catalog is CPU-bound, so the document is consumed inside
/// [`spawn_blocking`](tokio::task::spawn_blocking). Anything async (opening
/// connections, running a build) happens before the reader is returned.
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;

/// Unified interface for upstream sources.
///
/// # Time-based vs identity-based
/// Most sources are *time-based*: the indexer only asks them for a new
/// release once the configured update interval has elapsed. Sources whose
/// release identifier is a local path (a file produced by a build, a store
/// path) are *identity-based* instead and report that path through
/// [`identity()`](Self::identity); they are stale exactly when that path
/// differs from the stored release, regardless of elapsed time.
///
/// # Cancellation
/// Both async methods receive the run's [`CancellationToken`]. Anything that
/// waits on the outside world should race against
/// [`cancelled()`](CancellationToken::cancelled) and bail with
/// [`Cancelled`](crate::error::ErrorKind::Cancelled).
///
/// # Examples
///
/// ```
/// use pkgdex_fetch::{Fetcher, IndexMetadata, error::Result};
/// use tokio_util::sync::CancellationToken;
///
/// async fn needs_download(fetcher: &dyn Fetcher, metadata: &IndexMetadata) -> Result<bool> {
///     let cancel = CancellationToken::new();
///     let latest = fetcher.latest_release(&cancel, metadata).await?;
///     Ok(latest != metadata.curr_release)
/// }
/// ```
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Human-readable label, used for logging only.
    fn name(&self) -> &str;

    /// Resolve the identifier of the newest available upstream release.
    ///
    /// The current metadata is passed in so that sources can resume from the
    /// release they already know about (e.g. listing a bucket starting after
    /// the current key).
    async fn latest_release(&self, cancel: &CancellationToken, metadata: &IndexMetadata) -> Result<String>;

    /// Open the raw document for `release`.
    ///
    /// The document must be a JSON object with a `"packages"` member; see
    /// [`PackagesWrapper`](crate::PackagesWrapper) for sources that publish a
    /// bare package set.
    async fn download_release(&self, cancel: &CancellationToken, release: &str) -> Result<BoxSyncRead>;

    /// Current identity of an identity-based source, `None` for time-based ones.
    fn identity(&self) -> Option<&str> {
        None
    }
}
