//! Concurrent refresh of stale indexes.

use crate::Index;
use crate::error::{ErrorKind, Result};
use crate::namespace::Namespace;
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use pkgdex_fetch::{BoxSyncRead, IndexMetadata};
use pkgdex_store::Store;
use std::collections::HashMap;
use std::path::PathBuf;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// What happened to an index that was refreshed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// The upstream still serves the stored release. Only the timestamp moved.
    Unchanged { release: String },
    /// The namespace now holds `release`.
    Refreshed { release: String, packages: u64 },
}

impl Refresh {
    pub fn release(&self) -> &str {
        match self {
            Self::Unchanged { release } | Self::Refreshed { release, .. } => release,
        }
    }
}

/// Result of refreshing a single index.
#[derive(Debug)]
pub struct IndexOutcome {
    pub index: String,
    pub result: Result<Refresh>,
}

/// Refresh every index in `indexes` concurrently, one task each.
///
/// Outcomes are yielded in completion order. A failing (or panicking) worker
/// only produces an error outcome for its own index. Cancelling `cancel` makes
/// every worker stop at its next suspension point; a worker stopped before its
/// store commit leaves the namespace exactly as it was. Dropping the stream
/// aborts the workers that are still running, with the same guarantee.
///
/// Nothing here checks staleness: pass the result of
/// [`stale_indexes()`](crate::stale_indexes) for a regular run, or of
/// [`resolve_indexes()`](crate::resolve_indexes) to force a refresh.
pub fn run(
    cache_dir: impl Into<PathBuf>,
    indexes: Vec<Index>,
    cancel: CancellationToken,
) -> impl Stream<Item = IndexOutcome> {
    let cache_dir = cache_dir.into();
    stream!({
        let mut workers = JoinSet::new();
        let mut names = HashMap::with_capacity(indexes.len());
        for index in indexes {
            let name = index.name.clone();
            let worker = workers.spawn(refresh(Namespace::new(&cache_dir, &index.name), index, cancel.clone()));
            names.insert(worker.id(), name);
        }
        while let Some(joined) = workers.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(err) => (err.id(), Err(exn::Exn::from(err).raise(ErrorKind::Worker))),
            };
            let index = names.remove(&id).unwrap_or_default();
            yield IndexOutcome { index, result };
        }
    })
}

#[instrument(skip_all, fields(index = %index.name))]
async fn refresh(namespace: Namespace, index: Index, cancel: CancellationToken) -> Result<Refresh> {
    let Index { fetcher, metadata, .. } = index;

    let release = tokio::select! {
        biased;
        _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        release = fetcher.latest_release(&cancel, &metadata) => release.or_raise(|| ErrorKind::Fetch)?,
    };
    if release == metadata.curr_release {
        tracing::info!(%release, "already up to date");
        save_metadata(&namespace, &metadata.touched(OffsetDateTime::now_utc())).await;
        return Ok(Refresh::Unchanged { release });
    }

    tracing::info!(%release, previous = %metadata.curr_release, "downloading new release");
    let document = tokio::select! {
        biased;
        _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
        document = fetcher.download_release(&cancel, &release) => document.or_raise(|| ErrorKind::Download)?,
    };

    let store = namespace.open_store().await?;
    let indexed = replace_packages(&namespace, &store, document, &release, &cancel).await;
    store.close().await;
    let packages = indexed?;

    tracing::info!(%release, packages, "indexed");
    save_metadata(&namespace, &IndexMetadata::new(release.clone(), OffsetDateTime::now_utc())).await;
    Ok(Refresh::Refreshed { release, packages })
}

/// Swap the store contents and the package list over to `document`.
async fn replace_packages(
    namespace: &Namespace,
    store: &Store,
    document: BoxSyncRead,
    release: &str,
    cancel: &CancellationToken,
) -> Result<u64> {
    let mut keys = namespace.keys_writer().await?;
    let stats = match store.index(document, keys.writer(), cancel).await {
        Ok(stats) => stats,
        Err(err) if matches!(*err, pkgdex_store::error::ErrorKind::Cancelled) => {
            return Err(err).or_raise(|| ErrorKind::Cancelled);
        },
        Err(err) => return Err(err).or_raise(|| ErrorKind::Store),
    };
    // The store has committed. If the list can't be swapped in, the store is
    // ahead of it and of the metadata until the next run reindexes.
    if let Err(err) = keys.commit().await {
        tracing::warn!(%release, error = ?err, "store holds the new release but the package list was not replaced");
        return Err(err);
    }
    Ok(stats.packages)
}

/// Metadata is advisory: failing to record a successful run only means the
/// next run checks the upstream again.
async fn save_metadata(namespace: &Namespace, metadata: &IndexMetadata) {
    if let Err(err) = namespace.save_metadata(metadata).await {
        tracing::warn!(index = %namespace.name(), error = ?err, "could not save index metadata");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::KEYS_FILE;
    use crate::staleness::{resolve_indexes, stale_indexes};
    use futures::StreamExt;
    use pkgdex_fetch::{FetcherHandle, MockFetcher, Registry};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    const DOCUMENT_R1: &str = r#"{"version":2,"packages":{"pkg-a":{"version":"1.0"},"pkg-z":{"version":"2.0"}}}"#;
    const DOCUMENT_R2: &str = r#"{"packages":{"pkg-b":{"version":"3.0"}}}"#;

    fn index(name: &str, fetcher: &Arc<MockFetcher>, metadata: IndexMetadata) -> Index {
        let fetcher: FetcherHandle = fetcher.clone();
        Index { name: name.to_string(), fetcher, metadata }
    }

    async fn run_all(cache_dir: &Path, indexes: Vec<Index>) -> HashMap<String, Result<Refresh>> {
        run(cache_dir, indexes, CancellationToken::new())
            .map(|outcome| (outcome.index, outcome.result))
            .collect()
            .await
    }

    async fn store_keys(cache_dir: &Path, name: &str) -> Vec<String> {
        let store = Namespace::new(cache_dir, name).open_store().await.unwrap();
        let keys = store.keys().await.unwrap();
        store.close().await;
        keys
    }

    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    let data = std::fs::read(&path).unwrap();
                    files.push((path, data));
                }
            }
        }
        files.sort();
        files
    }

    #[tokio::test]
    async fn test_fresh_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new("nixpkgs").with_release("r1").with_document(DOCUMENT_R1));
        let outcomes = run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, IndexMetadata::default())]).await;

        let refresh = outcomes["nixpkgs"].as_ref().unwrap();
        assert_eq!(refresh, &Refresh::Refreshed { release: "r1".into(), packages: 2 });

        let namespace = Namespace::new(temp_dir.path(), "nixpkgs");
        assert_eq!(namespace.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        assert_eq!(store_keys(temp_dir.path(), "nixpkgs").await, vec!["pkg-a", "pkg-z"]);
        let metadata = namespace.metadata().await.unwrap();
        assert_eq!(metadata.curr_release, "r1");
        assert!(metadata.last_indexed_at.is_some());
    }

    #[tokio::test]
    async fn test_new_release_replaces_packages() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new("nixpkgs").with_release("r1").with_document(DOCUMENT_R1));
        run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, IndexMetadata::default())]).await;

        fetcher.set_release("r2");
        fetcher.set_document(DOCUMENT_R2);
        let namespace = Namespace::new(temp_dir.path(), "nixpkgs");
        let metadata = namespace.metadata().await.unwrap();
        let outcomes = run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, metadata)]).await;

        assert_eq!(outcomes["nixpkgs"].as_ref().unwrap(), &Refresh::Refreshed { release: "r2".into(), packages: 1 });
        assert_eq!(namespace.keys().await.unwrap(), vec!["pkg-b"]);
        assert_eq!(store_keys(temp_dir.path(), "nixpkgs").await, vec!["pkg-b"]);
        assert_eq!(namespace.metadata().await.unwrap().curr_release, "r2");
    }

    #[tokio::test]
    async fn test_unchanged_release_only_touches_timestamp() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new("nixpkgs").with_release("r1").with_document(DOCUMENT_R1));
        run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, IndexMetadata::default())]).await;

        let namespace = Namespace::new(temp_dir.path(), "nixpkgs");
        let before = namespace.metadata().await.unwrap();
        let keys_before = std::fs::read(namespace.dir().join("cache.txt")).unwrap();
        let store_before = snapshot(&namespace.store_dir());

        let old = IndexMetadata::new("r1", before.last_indexed_at.unwrap() - WEEK * 2);
        let outcomes = run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, old.clone())]).await;

        assert_eq!(outcomes["nixpkgs"].as_ref().unwrap(), &Refresh::Unchanged { release: "r1".into() });
        assert_eq!(fetcher.download_calls(), 1);
        assert_eq!(std::fs::read(namespace.dir().join("cache.txt")).unwrap(), keys_before);
        assert_eq!(snapshot(&namespace.store_dir()), store_before);
        let after = namespace.metadata().await.unwrap();
        assert_eq!(after.curr_release, "r1");
        assert!(after.last_indexed_at > old.last_indexed_at);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let good = Arc::new(MockFetcher::new("good").with_release("r1").with_document(DOCUMENT_R1));
        let no_release = Arc::new(MockFetcher::new("no-release"));
        let no_document = Arc::new(MockFetcher::new("no-document").with_release("r1"));
        let broken = Arc::new(MockFetcher::new("broken").with_release("r1").with_document(r#"{"packages":{"x":"#));

        let outcomes = run_all(
            temp_dir.path(),
            vec![
                index("good", &good, IndexMetadata::default()),
                index("no-release", &no_release, IndexMetadata::default()),
                index("no-document", &no_document, IndexMetadata::default()),
                index("broken", &broken, IndexMetadata::default()),
            ],
        )
        .await;

        assert_eq!(outcomes.len(), 4);
        assert!(outcomes["good"].is_ok());
        assert!(matches!(**outcomes["no-release"].as_ref().unwrap_err(), ErrorKind::Fetch));
        assert!(matches!(**outcomes["no-document"].as_ref().unwrap_err(), ErrorKind::Download));
        assert!(matches!(**outcomes["broken"].as_ref().unwrap_err(), ErrorKind::Store));

        assert_eq!(Namespace::new(temp_dir.path(), "good").keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        // Failed indexes keep their (empty) state.
        for name in ["no-release", "no-document", "broken"] {
            let namespace = Namespace::new(temp_dir.path(), name);
            assert!(namespace.metadata().await.unwrap().is_empty(), "{name}");
            assert!(namespace.keys().await.unwrap().is_empty(), "{name}");
        }
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_release() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new("nixpkgs").with_release("r1").with_document(DOCUMENT_R1));
        run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, IndexMetadata::default())]).await;

        fetcher.set_release("r2");
        fetcher.set_document(r#"{"packages":{"pkg-b":{},"pkg-c":[1,"#);
        let namespace = Namespace::new(temp_dir.path(), "nixpkgs");
        let metadata = namespace.metadata().await.unwrap();
        let outcomes = run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, metadata.clone())]).await;

        assert!(outcomes["nixpkgs"].is_err());
        assert_eq!(namespace.metadata().await.unwrap(), metadata);
        assert_eq!(namespace.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        assert_eq!(store_keys(temp_dir.path(), "nixpkgs").await, vec!["pkg-a", "pkg-z"]);
        assert!(!namespace.dir().join("cache.txt.tmp").exists());
    }

    #[tokio::test]
    async fn test_unreplaceable_package_list_is_retried() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new("nixpkgs").with_release("r1").with_document(DOCUMENT_R1));
        let namespace = Namespace::new(temp_dir.path(), "nixpkgs");
        // A directory in the way makes the final rename fail.
        let blocker = namespace.dir().join(KEYS_FILE);
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        let outcomes = run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, IndexMetadata::default())]).await;
        assert!(matches!(**outcomes["nixpkgs"].as_ref().unwrap_err(), ErrorKind::Keys));
        assert!(!namespace.dir().join("cache.txt.tmp").exists());
        // The metadata still names no release, so the index stays stale.
        assert!(namespace.metadata().await.unwrap().curr_release.is_empty());

        std::fs::remove_dir_all(&blocker).unwrap();
        let metadata = namespace.metadata().await.unwrap();
        let outcomes = run_all(temp_dir.path(), vec![index("nixpkgs", &fetcher, metadata)]).await;
        assert_eq!(outcomes["nixpkgs"].as_ref().unwrap(), &Refresh::Refreshed { release: "r1".into(), packages: 2 });
        assert_eq!(namespace.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        assert_eq!(namespace.metadata().await.unwrap().curr_release, "r1");
    }

    #[tokio::test]
    async fn test_cancelled_before_download() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(MockFetcher::new("nixpkgs").with_release("r1").with_document(DOCUMENT_R1).hanging());
        let cancel = CancellationToken::new();
        let outcomes = run(temp_dir.path(), vec![index("nixpkgs", &fetcher, IndexMetadata::default())], cancel.clone());
        tokio::pin!(outcomes);

        let (outcome, ()) = tokio::join!(outcomes.next(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });
        let outcome = outcome.unwrap();
        assert_eq!(outcome.index, "nixpkgs");
        assert!(matches!(*outcome.result.unwrap_err(), ErrorKind::Cancelled));
        assert_eq!(fetcher.download_calls(), 0);
        assert!(outcomes.next().await.is_none());
        assert!(!temp_dir.path().join("nixpkgs").join("store").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_indexes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let names = ["one", "two", "three"];
        let mut registry = Registry::new();
        for name in names {
            registry.register(name, move || {
                Arc::new(MockFetcher::new(name).with_release(format!("{name}-r1")).with_document(DOCUMENT_R2))
            });
        }

        let stale = stale_indexes(temp_dir.path(), &names, &registry, WEEK).await.unwrap();
        assert_eq!(stale.len(), 3);
        let outcomes = run_all(temp_dir.path(), stale).await;
        for name in names {
            assert_eq!(outcomes[name].as_ref().unwrap().release(), format!("{name}-r1"));
        }

        // Everything is fresh now.
        assert!(stale_indexes(temp_dir.path(), &names, &registry, WEEK).await.unwrap().is_empty());
        assert_eq!(resolve_indexes(temp_dir.path(), &names, &registry).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_identity_based_index() {
        let temp_dir = tempfile::tempdir().unwrap();
        let registry = Registry::new().with("options", || {
            Arc::new(
                MockFetcher::new("options")
                    .with_identity("/nix/store/a-options.json")
                    .with_release("/nix/store/a-options.json")
                    .with_document(DOCUMENT_R2),
            )
        });

        let stale = stale_indexes(temp_dir.path(), &["options"], &registry, WEEK).await.unwrap();
        assert_eq!(stale.len(), 1);
        run_all(temp_dir.path(), stale).await;
        // Same identity: fresh even with a zero interval.
        assert!(stale_indexes(temp_dir.path(), &["options"], &registry, Duration::ZERO).await.unwrap().is_empty());
    }
}
