//! Scripted in-memory fetcher for testing.

use crate::error::{ErrorKind, Result};
use crate::models::IndexMetadata;
use crate::source::{BoxSyncRead, Fetcher};
use async_trait::async_trait;
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Scripted in-memory fetcher for testing.
///
/// Answers with whatever release and document it was built with, fails when
/// either is missing, and counts how often it was asked. Shared through an
/// `Arc` so tests can keep a handle for assertions after giving a clone to
/// the indexer.
///
/// # Examples
///
/// ```
/// use pkgdex_fetch::MockFetcher;
///
/// let fetcher = MockFetcher::new("nixpkgs")
///     .with_release("r1")
///     .with_document(r#"{"packages":{"hello":{}}}"#);
/// assert_eq!(fetcher.latest_calls(), 0);
/// ```
pub struct MockFetcher {
    name: String,
    release: Mutex<Option<String>>,
    document: Mutex<Option<Vec<u8>>>,
    identity: Option<String>,
    hang: bool,
    latest_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MockFetcher {
    /// A fetcher that fails both calls until configured otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            release: Mutex::new(None),
            document: Mutex::new(None),
            identity: None,
            hang: false,
            latest_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn with_release(self, release: impl Into<String>) -> Self {
        self.set_release(release);
        self
    }

    #[must_use]
    pub fn with_document(self, document: impl Into<Vec<u8>>) -> Self {
        self.set_document(document);
        self
    }

    /// Make this an identity-based fetcher.
    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Make [`latest_release()`](Fetcher::latest_release) wait until the run
    /// is cancelled.
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Pretend the upstream published a new release.
    pub fn set_release(&self, release: impl Into<String>) {
        *self.release.lock().unwrap_or_else(|e| e.into_inner()) = Some(release.into());
    }

    pub fn set_document(&self, document: impl Into<Vec<u8>>) {
        *self.document.lock().unwrap_or_else(|e| e.into_inner()) = Some(document.into());
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn latest_release(&self, cancel: &CancellationToken, _metadata: &IndexMetadata) -> Result<String> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            cancel.cancelled().await;
        }
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let release = self.release.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match release {
            Some(release) => Ok(release),
            None => exn::bail!(ErrorKind::Unavailable(format!("{}: no release configured", self.name))),
        }
    }

    async fn download_release(&self, cancel: &CancellationToken, _release: &str) -> Result<BoxSyncRead> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let document = self.document.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match document {
            Some(document) => Ok(Box::new(Cursor::new(document))),
            None => exn::bail!(ErrorKind::Unavailable(format!("{}: no document configured", self.name))),
        }
    }

    fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}
