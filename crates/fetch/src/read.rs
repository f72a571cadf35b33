//! Reader adapters shared by fetchers.

use crate::error::{ErrorKind, Result};
use crate::source::BoxSyncRead;
use brotli::Decompressor as BrotliDecoder;
use flate2::read::GzDecoder;
use std::io::{self, Chain, Read};
use std::path::Path;

const BROTLI_BUFFER_SIZE: usize = 4096;
const PACKAGES_PREFIX: &[u8] = br#"{"packages":"#;
const PACKAGES_SUFFIX: &[u8] = b"}";

/// Compression of a release document, detected from its file extension.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Brotli compression (.br)
    Brotli,
    /// Gzip compression (.gz)
    Gzip,
}

impl Compression {
    /// Detect compression from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "br" => Compression::Brotli,
                "gz" => Compression::Gzip,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Wrap a reader with the matching decompressor.
    pub fn wrap_reader<R: Read + Send + 'static>(self, reader: R) -> BoxSyncRead {
        match self {
            Compression::None => Box::new(reader),
            Compression::Brotli => Box::new(BrotliDecoder::new(reader, BROTLI_BUFFER_SIZE)),
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
        }
    }
}

/// Turns a bare package set into the document shape the indexer expects.
///
/// ```text
/// { "pkg1": {...}, "pkg2": {...} }
/// ```
/// becomes
/// ```text
/// { "packages": { "pkg1": {...}, "pkg2": {...} } }
/// ```
///
/// Nothing is buffered: the prefix and suffix are chained around the inner
/// reader.
pub struct PackagesWrapper<R> {
    inner: Chain<Chain<&'static [u8], R>, &'static [u8]>,
}

impl<R: Read> PackagesWrapper<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: PACKAGES_PREFIX.chain(inner).chain(PACKAGES_SUFFIX) }
    }
}

impl<R: Read> Read for PackagesWrapper<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Opens a local release document: decompress by extension, then optionally
/// wrap a bare package set.
pub(crate) async fn open_document(path: &Path, wrap: bool) -> Result<BoxSyncRead> {
    let file = tokio::fs::File::open(path).await.map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
        _ => ErrorKind::Io,
    })?;
    let reader = Compression::from_path(path).wrap_reader(file.into_std().await);
    Ok(if wrap { Box::new(PackagesWrapper::new(reader)) } else { reader })
}
