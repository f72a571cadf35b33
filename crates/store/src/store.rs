//! Database connection and the index/lookup operations.

use exn::ResultExt;
use pkgdex_extract::Entry;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqliteLockingMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::record::inject_key;

/// Embedded migrations that are run automatically on open.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
/// Database file name inside the store directory.
pub const DATABASE_FILE: &str = "packages.db";
// A second handle should fail fast instead of queueing behind an indexing run.
const LOCK_TIMEOUT: Duration = Duration::from_millis(250);
// Parsed entries buffered between the blocking parser and the writer.
const ENTRY_BUFFER: usize = 1024;

/// Counters reported by [`Store::index()`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Distinct package names written.
    pub packages: u64,
    /// Entries whose name had already been seen; the later value won.
    pub duplicates: u64,
    /// Bytes of stored records, including injected keys.
    pub bytes: u64,
}

/// Exclusive handle on one namespace's package records.
///
/// The connection runs with `locking_mode = EXCLUSIVE` and the lock is taken
/// on open, so while a `Store` is alive no other handle (from this process or
/// another) can open the same directory.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    path: PathBuf,
}

impl Store {
    async fn new(options: SqliteConnectOptions, path: PathBuf) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            // The exclusive lock belongs to the connection: keep exactly one,
            // and never let the pool recycle it.
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|err| connect_error(err, &path))?;
        let store = Self { pool, path };
        store.lock().await?;
        store.migrate().await?;
        Ok(store)
    }

    /// Open (creating if needed) the store inside `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Locked`](ErrorKind::Locked) if another handle has the store
    /// open.
    #[instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await.or_raise(|| ErrorKind::Io)?;
        let path = dir.join(DATABASE_FILE);
        let options = Self::base_options().filename(&path).create_if_missing(true);
        Self::new(options, path).await
    }

    /// Open a throwaway in-memory store.
    ///
    /// Not `#[cfg(test)]` so that other crates can use it in their tests.
    pub async fn open_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        Self::new(options, PathBuf::from(":memory:")).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .locking_mode(SqliteLockingMode::Exclusive)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(LOCK_TIMEOUT)
            // Every reindex frees and then reuses the same pages.
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA cache_size = -16384;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Exclusive locking mode only takes the lock on first access; touch the
    /// database with a write transaction so it is held from here on.
    async fn lock(&self) -> Result<()> {
        sqlx::query("BEGIN EXCLUSIVE; COMMIT;")
            .execute(&self.pool)
            .await
            .map(drop)
            .map_err(|err| connect_error(err, &self.path))
    }

    #[instrument("performing store migrations", skip_all)]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Location of the database file (`:memory:` for in-memory stores).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace every stored record with the packages in `document`.
    ///
    /// The document is parsed on a blocking thread and streamed into a single
    /// transaction that first drops all existing records. Each distinct name
    /// is written to `keys` followed by a newline, in document order.
    ///
    /// Nothing is committed unless the whole document was consumed: on any
    /// error, on cancellation, or if the returned future is dropped, the
    /// transaction is rolled back and the previous records stay intact.
    /// Whatever was written to `keys` by then is incomplete and should be
    /// discarded by the caller. `cancel` is checked between entries and once
    /// more before committing; the commit itself is never interrupted.
    #[instrument(skip_all, fields(store = %self.path.display()))]
    pub async fn index<R, W>(&self, document: R, keys: &mut W, cancel: &CancellationToken) -> Result<IndexStats>
    where
        R: Read + Send + 'static,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let (sender, mut receiver) = mpsc::channel(ENTRY_BUFFER);
        let parser = tokio::task::spawn_blocking(move || {
            for entry in pkgdex_extract::packages(document) {
                let failed = entry.is_err();
                // A closed channel means the writer gave up.
                if sender.blocking_send(entry).is_err() || failed {
                    break;
                }
            }
        });

        let mut transaction = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/drop_all.sql"))
            .execute(&mut *transaction)
            .await
            .or_raise(|| ErrorKind::Database)?;

        let mut seen = HashSet::new();
        let mut stats = IndexStats::default();
        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
                entry = receiver.recv() => entry,
            };
            let Some(entry) = entry else { break };
            let Entry { name, value } = entry.or_raise(|| ErrorKind::Extract)?;
            let record = inject_key(&name, &value)?;
            stats.bytes += record.len() as u64;
            sqlx::query(include_str!("../queries/insert.sql"))
                .bind(&name)
                .bind(record)
                .execute(&mut *transaction)
                .await
                .or_raise(|| ErrorKind::Database)?;
            if seen.contains(&name) {
                tracing::debug!(package = %name, "duplicate package name, keeping the later value");
                stats.duplicates += 1;
                continue;
            }
            keys.write_all(name.as_bytes()).await.or_raise(|| ErrorKind::Io)?;
            keys.write_all(b"\n").await.or_raise(|| ErrorKind::Io)?;
            seen.insert(name);
            stats.packages += 1;
        }
        // The channel also closes if the parser panicked; only a clean finish
        // means the document was fully consumed.
        parser.await.or_raise(|| ErrorKind::Extract)?;
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }

        transaction.commit().await.or_raise(|| ErrorKind::Database)?;
        keys.flush().await.or_raise(|| ErrorKind::Io)?;
        tracing::debug!(packages = stats.packages, duplicates = stats.duplicates, bytes = stats.bytes, "indexed");
        Ok(stats)
    }

    /// Raw record stored for `name`, if any.
    pub async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        sqlx::query_scalar(include_str!("../queries/load.sql"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// All stored package names, sorted.
    pub async fn keys(&self) -> Result<Vec<String>> {
        sqlx::query_scalar(include_str!("../queries/keys.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Close the store, releasing the lock.
    pub async fn close(self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

/// Map a connection-time failure, telling lock contention apart from
/// everything else.
fn connect_error(err: sqlx::Error, path: &Path) -> crate::error::Error {
    let kind = if is_busy(&err) { ErrorKind::Locked(path.to_path_buf()) } else { ErrorKind::Database };
    exn::Exn::from(err).raise(kind)
}

/// `SQLITE_BUSY` (5) or `SQLITE_LOCKED` (6), including their extended codes.
fn is_busy(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|err| err.code())
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const DOCUMENT: &str = r#"{
        "version": 2,
        "packages": {
            "pkg-a": {"version": "1.0"},
            "pkg-z": {"version": "2.0", "meta": {"description": "last"}}
        },
        "trailing": true
    }"#;

    fn document(text: &str) -> Cursor<Vec<u8>> {
        Cursor::new(text.as_bytes().to_vec())
    }

    async fn indexed(text: &str) -> (Store, String) {
        let store = Store::open_in_memory().await.unwrap();
        let mut keys = Vec::new();
        store.index(document(text), &mut keys, &CancellationToken::new()).await.unwrap();
        (store, String::from_utf8(keys).unwrap())
    }

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = Store::open_in_memory().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test]
    async fn test_index_and_load() {
        let (store, keys) = indexed(DOCUMENT).await;
        assert_eq!(keys, "pkg-a\npkg-z\n");
        assert_eq!(store.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);

        let record = store.load("pkg-a").await.unwrap().unwrap();
        assert_eq!(record, br#"{"_key":"pkg-a","version": "1.0"}"#);
        let record: serde_json::Value = serde_json::from_slice(&store.load("pkg-z").await.unwrap().unwrap()).unwrap();
        assert_eq!(record["_key"], "pkg-z");
        assert_eq!(record["meta"]["description"], "last");
        assert_eq!(store.load("missing").await.unwrap(), None);
        store.close().await;
    }

    #[tokio::test]
    async fn test_escaped_name_round_trip() {
        let (store, keys) = indexed(r#"{"packages":{"a.\"b\"":{"x":1}}}"#).await;
        assert_eq!(keys, "a.\"b\"\n");
        let record: serde_json::Value =
            serde_json::from_slice(&store.load(r#"a."b""#).await.unwrap().unwrap()).unwrap();
        assert_eq!(record["_key"], r#"a."b""#);
        assert_eq!(record["x"], 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_reindex_replaces_everything() {
        let (store, _) = indexed(DOCUMENT).await;
        let mut keys = Vec::new();
        let stats = store.index(document(r#"{"packages":{"pkg-new":{}}}"#), &mut keys, &CancellationToken::new()).await.unwrap();
        assert_eq!(stats.packages, 1);
        assert_eq!(keys, b"pkg-new\n");
        assert_eq!(store.keys().await.unwrap(), vec!["pkg-new"]);
        assert_eq!(store.load("pkg-a").await.unwrap(), None);
        assert_eq!(store.load("pkg-new").await.unwrap().unwrap(), br#"{"_key":"pkg-new"}"#);
        store.close().await;
    }

    #[tokio::test]
    async fn test_empty_package_set() {
        let (store, keys) = indexed(r#"{"packages":{}}"#).await;
        assert!(keys.is_empty());
        assert!(store.keys().await.unwrap().is_empty());
        store.close().await;
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_later_value() {
        let store = Store::open_in_memory().await.unwrap();
        let mut keys = Vec::new();
        let stats = store
            .index(document(r#"{"packages":{"a":{"v":1},"b":{},"a":{"v":2}}}"#), &mut keys, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(stats, IndexStats { packages: 2, duplicates: 1, bytes: stats.bytes });
        assert_eq!(keys, b"a\nb\n");
        assert_eq!(store.load("a").await.unwrap().unwrap(), br#"{"_key":"a","v":2}"#);
        store.close().await;
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_records() {
        let (store, _) = indexed(DOCUMENT).await;
        let mut keys = Vec::new();
        let err = store
            .index(document(r#"{"packages":{"pkg-b":{},"pkg-c":"#), &mut keys, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(*err, ErrorKind::Extract));
        assert_eq!(store.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        assert!(store.load("pkg-b").await.unwrap().is_none());
        assert!(store.load("pkg-a").await.unwrap().is_some());
        store.close().await;
    }

    #[tokio::test]
    async fn test_non_object_value_keeps_previous_records() {
        let (store, _) = indexed(DOCUMENT).await;
        let mut keys = Vec::new();
        let err = store
            .index(document(r#"{"packages":{"ok":{},"bad":[1]}}"#), &mut keys, &CancellationToken::new())
            .await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidRecord(name) if name == "bad"));
        assert_eq!(store.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        store.close().await;
    }

    #[tokio::test]
    async fn test_cancelled_index_keeps_previous_records() {
        let (store, _) = indexed(DOCUMENT).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut keys = Vec::new();
        let err = store.index(document(r#"{"packages":{"pkg-new":{}}}"#), &mut keys, &cancel).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Cancelled));
        assert_eq!(store.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        store.close().await;
    }

    #[tokio::test]
    async fn test_missing_packages_key() {
        let store = Store::open_in_memory().await.unwrap();
        let mut keys = Vec::new();
        let err = store.index(document(r#"{"version":2}"#), &mut keys, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Extract));
        store.close().await;
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Store::open(temp_dir.path().join("store")).await.unwrap();
        assert_eq!(store.path(), temp_dir.path().join("store").join(DATABASE_FILE));
        store.index(document(DOCUMENT), &mut tokio::io::sink(), &CancellationToken::new()).await.unwrap();
        store.close().await;

        let store = Store::open(temp_dir.path().join("store")).await.unwrap();
        assert_eq!(store.keys().await.unwrap(), vec!["pkg-a", "pkg-z"]);
        store.close().await;
    }

    #[tokio::test]
    async fn test_second_handle_is_refused() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first = Store::open(temp_dir.path()).await.unwrap();
        assert!(Store::open(temp_dir.path()).await.is_err());
        first.close().await;

        let again = Store::open(temp_dir.path()).await.unwrap();
        again.close().await;
    }
}
