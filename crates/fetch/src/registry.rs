//! Index name → fetcher constructor mapping.

use crate::FetcherHandle;
use std::collections::BTreeMap;
use std::fmt;

type Constructor = Box<dyn Fn() -> FetcherHandle + Send + Sync>;

/// Explicitly constructed mapping from index name to fetcher constructor.
///
/// There is deliberately no global registry: whoever starts an indexing run
/// builds one (usually from configuration) and hands it over, and tests build
/// their own with mock fetchers.
///
/// # Examples
///
/// ```
/// use pkgdex_fetch::{FileFetcher, Registry};
/// use std::sync::Arc;
///
/// # fn example() -> pkgdex_fetch::error::Result<()> {
/// let options = FileFetcher::new("my-options", "/etc/options.json")?;
/// let registry = Registry::new().with("my-options", move || Arc::new(options.clone()));
/// assert!(registry.contains("my-options"));
/// assert!(registry.fetcher("nixpkgs").is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Registry {
    constructors: BTreeMap<String, Constructor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> FetcherHandle + Send + Sync + 'static,
    ) -> &mut Self {
        let name = name.into();
        if self.constructors.insert(name.clone(), Box::new(constructor)).is_some() {
            tracing::debug!(index = %name, "replacing registered fetcher");
        }
        self
    }

    /// Builder-style [`register()`](Self::register).
    #[must_use]
    pub fn with(
        mut self,
        name: impl Into<String>,
        constructor: impl Fn() -> FetcherHandle + Send + Sync + 'static,
    ) -> Self {
        self.register(name, constructor);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered index names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Construct a fresh fetcher for `name`.
    pub fn fetcher(&self, name: &str) -> Option<FetcherHandle> {
        self.constructors.get(name).map(|constructor| constructor())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::MockFetcher;
    use std::sync::Arc;

    #[test]
    fn test_register_and_construct() {
        let registry = Registry::new()
            .with("b", || Arc::new(MockFetcher::new("b")))
            .with("a", || Arc::new(MockFetcher::new("a")));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(registry.fetcher("a").unwrap().name(), "a");
        assert!(registry.fetcher("c").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = Registry::new();
        registry.register("a", || Arc::new(MockFetcher::new("first")));
        registry.register("a", || Arc::new(MockFetcher::new("second")));
        assert_eq!(registry.fetcher("a").unwrap().name(), "second");
    }

    #[test]
    fn test_registries_are_independent() {
        let one = Registry::new().with("a", || Arc::new(MockFetcher::new("a")));
        let two = Registry::new();
        assert!(one.contains("a"));
        assert!(!two.contains("a"));
    }
}
