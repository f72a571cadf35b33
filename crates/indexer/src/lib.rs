//! Keeping local package indexes in sync with their upstreams.
//!
//! Every index lives in its own [`Namespace`] under a shared cache directory.
//! A run looks like this:
//!
//! 1. [`stale_indexes()`] works out which indexes need a refresh,
//! 2. [`run()`] refreshes them concurrently and streams one [`IndexOutcome`]
//!    per index,
//! 3. [`Namespace::keys()`] and [`load()`] serve the results.

pub mod error;
mod lookup;
mod namespace;
mod run;
mod staleness;

pub use crate::lookup::{load, load_as};
pub use crate::namespace::{KEYS_FILE, KeysWriter, METADATA_FILE, Namespace, STORE_DIR};
pub use crate::run::{IndexOutcome, Refresh, run};
pub use crate::staleness::{needs_indexing, resolve_indexes, stale_indexes};
use pkgdex_fetch::{FetcherHandle, IndexMetadata};

/// A named index ready to be refreshed.
///
/// Rebuilt every invocation from configuration, the [`Registry`](pkgdex_fetch::Registry)
/// and the namespace's stored metadata.
#[derive(Clone)]
pub struct Index {
    pub name: String,
    pub fetcher: FetcherHandle,
    pub metadata: IndexMetadata,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.name)
            .field("fetcher", &self.fetcher.name())
            .field("metadata", &self.metadata)
            .finish()
    }
}
