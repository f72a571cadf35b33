use crate::error::{ErrorKind, Result};
use crate::namespace::Namespace;
use exn::ResultExt;
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::instrument;

/// Stored record of package `name` in `index`, with its `"_key"` member.
///
/// Opens the index's store for the duration of the lookup, so this fails
/// while the index is being refreshed.
#[instrument(skip(cache_dir))]
pub async fn load(cache_dir: impl AsRef<Path>, index: &str, name: &str) -> Result<Option<Vec<u8>>> {
    let store = Namespace::new(cache_dir, index).open_store().await?;
    let record = store.load(name).await.or_raise(|| ErrorKind::Store);
    store.close().await;
    record
}

/// [`load()`] and decode the record as `T`.
pub async fn load_as<T: DeserializeOwned>(cache_dir: impl AsRef<Path>, index: &str, name: &str) -> Result<Option<T>> {
    match load(cache_dir, index, name).await? {
        Some(record) => serde_json::from_slice(&record).map(Some).or_raise(|| ErrorKind::Decode),
        None => Ok(None),
    }
}
