//! `pkgdex` command-line entry point.

use clap::Parser;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod error;
mod sources;

use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // PKGDEX_LOG wins over -v/-q.
    let filter = EnvFilter::try_from_env(pkgdex_config::LOG_ENV).unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    // Logs go to stderr; stdout is for package names and records.
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
    tracing::debug!(?args, "CLI arguments parsed");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping after the current step");
                cancel.cancel();
            }
        }
    });

    match commands::execute(args, cancel).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
