//! Deciding which indexes need a refresh.

use crate::Index;
use crate::error::{ErrorKind, Result};
use crate::namespace::Namespace;
use exn::OptionExt;
use pkgdex_fetch::{IndexMetadata, Registry};
use std::path::Path;
use std::time::Duration;
use time::OffsetDateTime;

/// Whether an index with `metadata` should be refreshed at `now`.
///
/// Identity-based fetchers (see [`Fetcher::identity()`](pkgdex_fetch::Fetcher::identity))
/// are stale exactly when their identity differs from the stored release,
/// however recently they were indexed. Everything else is stale once more
/// than `interval` has passed since the last successful check, or if it has
/// never been indexed at all.
///
/// # Examples
///
/// ```
/// use pkgdex_fetch::IndexMetadata;
/// use pkgdex_indexer::needs_indexing;
/// use std::time::Duration;
/// use time::OffsetDateTime;
///
/// let week = Duration::from_secs(7 * 24 * 60 * 60);
/// let now = OffsetDateTime::now_utc();
/// assert!(needs_indexing(&IndexMetadata::default(), week, None, now));
/// assert!(!needs_indexing(&IndexMetadata::new("r1", now), week, None, now));
/// ```
pub fn needs_indexing(
    metadata: &IndexMetadata,
    interval: Duration,
    identity: Option<&str>,
    now: OffsetDateTime,
) -> bool {
    if let Some(identity) = identity {
        return identity != metadata.curr_release;
    }
    match metadata.last_indexed_at {
        Some(indexed_at) => now - indexed_at > interval,
        None => true,
    }
}

/// Resolve `names` into [`Index`] values with their current metadata.
///
/// # Errors
///
/// Fails with [`UnknownIndex`](ErrorKind::UnknownIndex) on the first name
/// that has no registered fetcher, before touching any namespace.
pub async fn resolve_indexes(
    cache_dir: impl AsRef<Path>,
    names: &[impl AsRef<str>],
    registry: &Registry,
) -> Result<Vec<Index>> {
    let cache_dir = cache_dir.as_ref();
    let fetchers = names
        .iter()
        .map(|name| {
            let name = name.as_ref();
            registry.fetcher(name).map(|fetcher| (name, fetcher)).ok_or_raise(|| ErrorKind::UnknownIndex(name.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    let mut indexes = Vec::with_capacity(fetchers.len());
    for (name, fetcher) in fetchers {
        let metadata = Namespace::new(cache_dir, name).metadata().await?;
        indexes.push(Index { name: name.to_string(), fetcher, metadata });
    }
    Ok(indexes)
}

/// The subset of `names` that [needs indexing](needs_indexing) right now.
pub async fn stale_indexes(
    cache_dir: impl AsRef<Path>,
    names: &[impl AsRef<str>],
    registry: &Registry,
    interval: Duration,
) -> Result<Vec<Index>> {
    let now = OffsetDateTime::now_utc();
    let indexes = resolve_indexes(cache_dir, names, registry).await?;
    Ok(indexes
        .into_iter()
        .filter(|index| {
            let stale = needs_indexing(&index.metadata, interval, index.fetcher.identity(), now);
            tracing::debug!(index = %index.name, stale, "checked staleness");
            stale
        })
        .collect())
}
