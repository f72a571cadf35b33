//! Streaming extraction of package entries from large JSON catalogs.
//!
//! Upstream catalogs are a single JSON object with a `"packages"` member
//! mapping package names to arbitrary JSON values, and they can be big
//! (the nixpkgs one is well over a hundred thousand entries). [`Packages`]
//! walks such a document once, front to back, skipping anything that isn't
//! `"packages"` and handing out each package's value as the raw bytes that
//! appeared in the document.

pub mod error;
mod packages;
mod scanner;

pub use crate::packages::{Entry, Packages};
use std::io::{BufReader, Read};

/// Read buffer used by [`packages()`].
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Wraps an unbuffered reader (file, decompressor, HTTP body) in a
/// generously sized buffer and returns the [`Packages`] iterator over it.
pub fn packages<R: Read>(reader: R) -> Packages<BufReader<R>> {
    Packages::new(BufReader::with_capacity(READ_BUFFER_SIZE, reader))
}
