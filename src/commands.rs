//! Subcommand implementations.

use crate::cli::{Args, Command};
use crate::error::{ErrorKind, Result};
use crate::sources;
use exn::{OptionExt, ResultExt};
use futures::{Stream, StreamExt};
use pkgdex_config::{Config, format_duration};
use pkgdex_fetch::Registry;
use pkgdex_indexer::{IndexOutcome, Namespace, Refresh};
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::process::ExitCode;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

/// Separates the index from the package name in multi-index listings.
const KEY_SEPARATOR: &str = "/ ";

struct Context {
    config: Config,
    registry: Registry,
    cancel: CancellationToken,
}

pub async fn execute(args: Args, cancel: CancellationToken) -> Result<ExitCode> {
    let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let registry = sources::registry(&config)?;
    let ctx = Context { config, registry, cancel };
    match args.command {
        Command::Print { indexes } => print(&ctx, ctx.selected(indexes)).await,
        Command::Index { indexes, force } => index(&ctx, ctx.selected(indexes), force).await,
        Command::Preview { key, indexes } => preview(&ctx, &key.join(" "), &ctx.selected(indexes)).await,
    }
}

impl Context {
    fn selected(&self, indexes: Vec<String>) -> Vec<String> {
        if indexes.is_empty() { self.config.index_names() } else { indexes }
    }

    /// Start refreshing `names` (only the stale ones unless `force`).
    /// Outcomes arrive as each index finishes.
    async fn refresh(&self, names: &[String], force: bool) -> Result<impl Stream<Item = IndexOutcome>> {
        let cache_dir = &self.config.cache_dir;
        let indexes = match force {
            true => pkgdex_indexer::resolve_indexes(cache_dir, names, &self.registry).await,
            false => pkgdex_indexer::stale_indexes(cache_dir, names, &self.registry, self.config.update_interval).await,
        };
        let indexes = indexes.or_raise(|| ErrorKind::Index)?;
        if !indexes.is_empty() {
            tracing::info!(count = indexes.len(), "refreshing indexes");
        }
        Ok(pkgdex_indexer::run(cache_dir, indexes, self.cancel.clone()))
    }
}

async fn print(ctx: &Context, names: Vec<String>) -> Result<ExitCode> {
    let outcomes = ctx.refresh(&names, false).await?;
    let mut out = BufWriter::new(tokio::io::stdout());
    let printed = match print_keys(&ctx.config.cache_dir, &names, outcomes, &mut out).await {
        Ok(failed) => out.flush().await.map(|()| failed),
        Err(err) => Err(err),
    };
    match printed {
        Ok(failed) => Ok(exit_code(failed)),
        // The reader (a fuzzy finder, `head`) has seen enough.
        Err(err) if err.kind() == IoErrorKind::BrokenPipe => Ok(ExitCode::SUCCESS),
        Err(err) => Err(err).or_raise(|| ErrorKind::Output),
    }
}

/// Print the package list of every index in `names`. Refreshed indexes are
/// printed as their outcome arrives, the ones that were already fresh after
/// that. Returns whether any index failed.
///
/// A failed refresh leaves the previous list in place, so it is still printed.
async fn print_keys<S, W>(cache_dir: &Path, names: &[String], outcomes: S, out: &mut W) -> std::io::Result<bool>
where
    S: Stream<Item = IndexOutcome>,
    W: AsyncWrite + Unpin,
{
    let prefixed = names.len() > 1;
    let mut failed = false;
    let mut pending: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut outcomes = std::pin::pin!(outcomes);
    while let Some(outcome) = outcomes.next().await {
        if let Err(err) = &outcome.result {
            tracing::error!(index = %outcome.index, error = ?err, "could not refresh index");
            failed = true;
        }
        pending.retain(|name| *name != outcome.index);
        failed |= !print_index(cache_dir, &outcome.index, prefixed, out).await?;
        out.flush().await?;
    }
    for name in pending {
        failed |= !print_index(cache_dir, name, prefixed, out).await?;
    }
    Ok(failed)
}

/// Print one index's package list. Returns false if it couldn't be read.
async fn print_index<W>(cache_dir: &Path, name: &str, prefixed: bool, out: &mut W) -> std::io::Result<bool>
where
    W: AsyncWrite + Unpin,
{
    let reader = match Namespace::new(cache_dir, name).keys_reader().await {
        Ok(reader) => reader,
        Err(err) => {
            let err = err.raise(ErrorKind::Keys(name.to_string()));
            tracing::error!(index = %name, error = ?err, "could not read package list");
            return Ok(false);
        },
    };
    let prefix = prefixed.then(|| format!("{name}{KEY_SEPARATOR}"));
    let count = write_keys(reader, prefix.as_deref(), out).await?;
    tracing::debug!(index = %name, count, "printed package names");
    Ok(true)
}

/// Copy the non-empty lines of `reader` to `out`, each preceded by `prefix`.
async fn write_keys<R, W>(reader: R, prefix: Option<&str>, out: &mut W) -> std::io::Result<u64>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        if let Some(prefix) = prefix {
            out.write_all(prefix.as_bytes()).await?;
        }
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        count += 1;
    }
    Ok(count)
}

async fn index(ctx: &Context, names: Vec<String>, force: bool) -> Result<ExitCode> {
    let outcomes = ctx.refresh(&names, force).await?;
    let mut pending: Vec<&str> = names.iter().map(String::as_str).collect();
    let mut failed = false;
    let mut outcomes = std::pin::pin!(outcomes);
    while let Some(outcome) = outcomes.next().await {
        if let Err(err) = &outcome.result {
            tracing::error!(index = %outcome.index, error = ?err, "could not refresh index");
            failed = true;
        }
        pending.retain(|name| *name != outcome.index);
        println!("{}", report(&outcome));
    }
    for name in pending {
        println!(
            "{name}: up to date (checked within the last {})",
            format_duration(ctx.config.update_interval)
        );
    }
    Ok(exit_code(failed))
}

/// One line describing what happened to an index.
fn report(outcome: &IndexOutcome) -> String {
    let name = &outcome.index;
    match &outcome.result {
        Ok(Refresh::Unchanged { release }) => format!("{name}: no new release ({release})"),
        Ok(Refresh::Refreshed { release, packages }) => format!("{name}: indexed {packages} packages from {release}"),
        Err(err) => format!("{name}: failed: {err}"),
    }
}

fn exit_code(failed: bool) -> ExitCode {
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

async fn preview(ctx: &Context, key: &str, names: &[String]) -> Result<ExitCode> {
    let (index, name) = split_key(key, names).ok_or_raise(|| ErrorKind::AmbiguousKey(key.to_string()))?;
    // Opening the store of an unknown index would create an empty namespace.
    if !ctx.registry.contains(index) {
        exn::bail!(ErrorKind::UnknownIndex(index.to_string()));
    }
    let record: Option<serde_json::Value> =
        pkgdex_indexer::load_as(&ctx.config.cache_dir, index, name).await.or_raise(|| ErrorKind::Index)?;
    let record = record.ok_or_raise(|| ErrorKind::NotFound(key.to_string()))?;
    let pretty = serde_json::to_string_pretty(&record).or_raise(|| ErrorKind::Output)?;
    println!("{pretty}");
    Ok(ExitCode::SUCCESS)
}

/// Split a key as printed by `print` back into index and package name.
///
/// Fuzzy finders hand the two halves of `"<index>/ <name>"` back as separate
/// words, so the space after the slash is optional. With a single index in
/// use, names are printed bare and the prefix is optional too.
fn split_key<'a>(key: &'a str, names: &'a [String]) -> Option<(&'a str, &'a str)> {
    if let [only] = names {
        let name = key
            .trim()
            .strip_prefix(only.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key);
        return Some((only.as_str(), name.trim()));
    }
    let (index, name) = key.split_once('/')?;
    let (index, name) = (index.trim(), name.trim());
    (!index.is_empty() && !name.is_empty()).then_some((index, name))
}
