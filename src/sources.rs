//! Turning configured sources into fetchers.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use pkgdex_config::{Config, Source};
use pkgdex_fetch::{CommandFetcher, FetcherHandle, FileFetcher, Registry};
use std::sync::Arc;

/// Registry with one fetcher per configured source.
pub fn registry(config: &Config) -> Result<Registry> {
    let mut registry = Registry::new();
    for (name, source) in &config.sources {
        let fetcher = fetcher(name, source)?;
        registry.register(name.clone(), move || fetcher.clone());
    }
    Ok(registry)
}

fn fetcher(name: &str, source: &Source) -> Result<FetcherHandle> {
    let fetcher: FetcherHandle = match source {
        Source::File { path, wrap } => {
            let fetcher = FileFetcher::new(name, path).or_raise(|| ErrorKind::Config)?;
            Arc::new(if *wrap { fetcher.wrapped() } else { fetcher })
        },
        Source::Command { program, args, suffix, wrap } => {
            let mut fetcher = CommandFetcher::new(name, program).args(args);
            if let Some(suffix) = suffix {
                fetcher = fetcher.suffix(suffix);
            }
            Arc::new(if *wrap { fetcher.wrapped() } else { fetcher })
        },
    };
    Ok(fetcher)
}
