//! Local file fetcher.
//!
//! Points an index at a document that something else keeps up to date, such
//! as an options file produced by a Nix build. Store paths already carry a
//! content hash in their name, so the path itself is the release identifier:
//! a rebuild that changes the content produces a new path and triggers a
//! reindex, and an unchanged path never does.

use crate::error::{ErrorKind, Result};
use crate::models::IndexMetadata;
use crate::read::open_document;
use crate::source::{BoxSyncRead, Fetcher};
use async_trait::async_trait;
use exn::OptionExt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Identity-based fetcher for a single local document.
///
/// # Examples
///
/// ```no_run
/// use pkgdex_fetch::FileFetcher;
///
/// # fn example() -> pkgdex_fetch::error::Result<()> {
/// // A bare `{ "option": {...} }` set, wrapped into `{ "packages": ... }`.
/// let fetcher = FileFetcher::new("home-manager", "/nix/store/xxx-options/options.json")?.wrapped();
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileFetcher {
    name: String,
    path: String,
    wrap: bool,
}

impl FileFetcher {
    /// Create a fetcher for the document at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if the path is not
    /// absolute or not valid UTF-8 (it's stored as the release identifier).
    pub fn new(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
        }
        let path = path.to_str().ok_or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?.to_string();
        Ok(Self { name: name.into(), path, wrap: false })
    }

    /// Treat the document as a bare package set.
    #[must_use]
    pub fn wrapped(mut self) -> Self {
        self.wrap = true;
        self
    }

    pub fn path(&self) -> &Path {
        Path::new(&self.path)
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_release(&self, _cancel: &CancellationToken, _metadata: &IndexMetadata) -> Result<String> {
        Ok(self.path.clone())
    }

    async fn download_release(&self, cancel: &CancellationToken, release: &str) -> Result<BoxSyncRead> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        if release != self.path {
            // Only ever hands out its own path, so anything else is a caller bug.
            exn::bail!(ErrorKind::NotFound(PathBuf::from(release)));
        }
        open_document(self.path(), self.wrap).await
    }

    fn identity(&self) -> Option<&str> {
        Some(&self.path)
    }
}
