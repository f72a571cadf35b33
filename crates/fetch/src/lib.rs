//! Upstream fetchers for pkgdex.
//!
//! An index is kept in sync with exactly one upstream source. This crate
//! defines what the indexer needs from such a source ([`Fetcher`]), the
//! explicit [`Registry`] used to pick a fetcher per index name, the
//! [`IndexMetadata`] handed to fetchers, and a couple of source-agnostic
//! fetchers for documents that live on the local machine.

pub mod error;
mod models;
mod read;
mod registry;
pub mod source;

pub use crate::models::IndexMetadata;
pub use crate::read::{Compression, PackagesWrapper};
pub use crate::registry::Registry;
#[cfg(feature = "mock")]
pub use crate::source::MockFetcher;
pub use crate::source::{BoxSyncRead, CommandFetcher, FileFetcher, Fetcher};
use std::sync::Arc;

pub type FetcherHandle = Arc<dyn Fetcher>;
