//! Persistent per-namespace package records.
//!
//! A [`Store`] owns one SQLite database holding the packages of one index,
//! keyed by name. Indexing replaces the whole set in a single transaction, and
//! every stored record carries its own name in a leading `"_key"` member (see
//! [`inject_key()`]).

pub mod error;
mod record;
mod store;

pub use crate::record::inject_key;
pub use crate::store::{DATABASE_FILE, IndexStats, Store};
