//! On-disk layout of a single index.
//!
//! ```text
//! <cache_dir>/<index>/
//! ├── metadata.json   sync state (IndexMetadata)
//! ├── cache.txt       newline-delimited package names
//! └── store/          package records
//! ```

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgdex_fetch::IndexMetadata;
use pkgdex_store::Store;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};

pub const METADATA_FILE: &str = "metadata.json";
pub const KEYS_FILE: &str = "cache.txt";
pub const STORE_DIR: &str = "store";
const TEMP_SUFFIX: &str = ".tmp";

/// The directory holding everything pkgdex knows about one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    name: String,
    dir: PathBuf,
}

impl Namespace {
    pub fn new(cache_dir: impl AsRef<Path>, name: impl Into<String>) -> Self {
        let name = name.into();
        let dir = cache_dir.as_ref().join(&name);
        Self { name, dir }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn store_dir(&self) -> PathBuf {
        self.dir.join(STORE_DIR)
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    fn keys_path(&self) -> PathBuf {
        self.dir.join(KEYS_FILE)
    }

    /// Read the index metadata, creating `{}` on first access.
    pub async fn metadata(&self) -> Result<IndexMetadata> {
        let path = self.metadata_path();
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data).or_raise(|| ErrorKind::Metadata),
            Err(err) if err.kind() == IoErrorKind::NotFound => {
                tracing::debug!(index = %self.name, "initialising metadata");
                self.create_dir().await.or_raise(|| ErrorKind::Metadata)?;
                tokio::fs::write(&path, b"{}").await.or_raise(|| ErrorKind::Metadata)?;
                Ok(IndexMetadata::default())
            },
            Err(err) => Err(err).or_raise(|| ErrorKind::Metadata),
        }
    }

    /// Replace the index metadata.
    ///
    /// Written to a temporary file first and renamed into place, so readers
    /// never see a half-written document.
    pub async fn save_metadata(&self, metadata: &IndexMetadata) -> Result<()> {
        let data = serde_json::to_vec(metadata).or_raise(|| ErrorKind::Metadata)?;
        self.create_dir().await.or_raise(|| ErrorKind::Metadata)?;
        let path = self.metadata_path();
        let temp = with_suffix(&path, TEMP_SUFFIX);
        tokio::fs::write(&temp, data).await.or_raise(|| ErrorKind::Metadata)?;
        tokio::fs::rename(&temp, &path).await.or_raise(|| ErrorKind::Metadata)
    }

    /// Package names from the last successful reindex, in document order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        self.ensure_keys().await?;
        let data = tokio::fs::read_to_string(self.keys_path()).await.or_raise(|| ErrorKind::Keys)?;
        Ok(data.lines().filter(|line| !line.is_empty()).map(String::from).collect())
    }

    /// Open the package list for streaming, creating it empty on first access.
    pub async fn keys_reader(&self) -> Result<BufReader<File>> {
        self.ensure_keys().await?;
        let file = File::open(self.keys_path()).await.or_raise(|| ErrorKind::Keys)?;
        Ok(BufReader::new(file))
    }

    /// Start writing a replacement package list.
    pub async fn keys_writer(&self) -> Result<KeysWriter> {
        self.create_dir().await.or_raise(|| ErrorKind::Keys)?;
        let path = self.keys_path();
        let temp = with_suffix(&path, TEMP_SUFFIX);
        let file = File::create(&temp).await.or_raise(|| ErrorKind::Keys)?;
        Ok(KeysWriter { file: BufWriter::new(file), temp, path, committed: false })
    }

    /// Open this index's store. Fails if another handle has it open.
    pub async fn open_store(&self) -> Result<Store> {
        Store::open(self.store_dir()).await.or_raise(|| ErrorKind::Store)
    }

    async fn ensure_keys(&self) -> Result<()> {
        let path = self.keys_path();
        if tokio::fs::try_exists(&path).await.or_raise(|| ErrorKind::Keys)? {
            return Ok(());
        }
        self.create_dir().await.or_raise(|| ErrorKind::Keys)?;
        File::create(&path).await.or_raise(|| ErrorKind::Keys)?;
        Ok(())
    }

    async fn create_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut path = path.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

/// Pending replacement of a namespace's package list.
///
/// Names go to a temporary file that only replaces the real list on
/// [`commit()`](Self::commit). Dropping the writer without committing removes
/// the temporary file and leaves the previous list in place.
#[derive(Debug)]
pub struct KeysWriter {
    file: BufWriter<File>,
    temp: PathBuf,
    path: PathBuf,
    committed: bool,
}

impl KeysWriter {
    pub fn writer(&mut self) -> &mut BufWriter<File> {
        &mut self.file
    }

    /// Flush and move the new list into place.
    pub async fn commit(mut self) -> Result<()> {
        self.file.flush().await.or_raise(|| ErrorKind::Keys)?;
        self.file.get_ref().sync_all().await.or_raise(|| ErrorKind::Keys)?;
        tokio::fs::rename(&self.temp, &self.path).await.or_raise(|| ErrorKind::Keys)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for KeysWriter {
    fn drop(&mut self) {
        if !self.committed {
            // Blocking on purpose: drop can't await, and this is one unlink.
            _ = std::fs::remove_file(&self.temp);
        }
    }
}
