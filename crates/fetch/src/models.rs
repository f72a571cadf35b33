//! Fetch models.
//!
//! [`IndexMetadata`] is the only durable record of an index's sync state. It
//! lives here rather than next to the code that persists it because every
//! [`Fetcher`](crate::Fetcher) gets to look at it when resolving the latest
//! release.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Sync state of a single index.
///
/// A freshly created (never indexed) index has no timestamp and an empty
/// release, which always counts as stale.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// When the index was last confirmed to be up to date with its upstream.
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<OffsetDateTime>,
    /// Identifier of the upstream release currently stored in the namespace.
    #[serde(default)]
    pub curr_release: String,
}

impl IndexMetadata {
    pub fn new(release: impl Into<String>, indexed_at: OffsetDateTime) -> Self {
        Self {
            last_indexed_at: Some(indexed_at),
            curr_release: release.into(),
        }
    }

    /// Same release, new timestamp. Used when the upstream hasn't moved on.
    #[must_use]
    pub fn touched(&self, now: OffsetDateTime) -> Self {
        Self::new(self.curr_release.clone(), now)
    }

    /// `true` if nothing has ever been indexed.
    pub fn is_empty(&self) -> bool {
        self.last_indexed_at.is_none() && self.curr_release.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_empty_object_is_default() {
        let md: IndexMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(md, IndexMetadata::default());
        assert!(md.is_empty());
    }

    #[test]
    fn test_wire_format() {
        let md = IndexMetadata::new("nixpkgs/nixpkgs-25.05pre1", datetime!(2025-01-02 03:04:05 UTC));
        let json = serde_json::to_string(&md).unwrap();
        assert_eq!(json, r#"{"last_indexed_at":"2025-01-02T03:04:05Z","curr_release":"nixpkgs/nixpkgs-25.05pre1"}"#);
        assert_eq!(serde_json::from_str::<IndexMetadata>(&json).unwrap(), md);
    }

    #[test]
    fn test_touched_keeps_release() {
        let md = IndexMetadata::new("abc", datetime!(2025-01-01 00:00 UTC));
        let touched = md.touched(datetime!(2025-02-01 00:00 UTC));
        assert_eq!(touched.curr_release, "abc");
        assert_eq!(touched.last_indexed_at, Some(datetime!(2025-02-01 00:00 UTC)));
    }
}
