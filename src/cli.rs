use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// Locally cached, on-demand synchronised package catalogs.
#[derive(Debug, Parser)]
#[command(name = "pkgdex", version, about)]
pub struct Args {
    /// Configuration file (replaces the default locations)
    #[arg(short, long, global = true, env = pkgdex_config::CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Refresh stale indexes, then print every package name
    ///
    /// With more than one index, names are prefixed with "<index>/ ".
    Print {
        /// Indexes to print (default: from configuration)
        #[arg(short = 'i', long = "index", value_name = "NAME")]
        indexes: Vec<String>,
    },
    /// Refresh indexes and report what happened
    Index {
        /// Indexes to refresh (default: from configuration)
        #[arg(short = 'i', long = "index", value_name = "NAME")]
        indexes: Vec<String>,
        /// Refresh even if the index is not stale
        #[arg(short, long)]
        force: bool,
    },
    /// Print the stored record of a package
    Preview {
        /// Package as printed by `print`: "<index>/ <name>", or just the name
        /// when only one index is in use. Several words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        key: Vec<String>,
        /// Indexes in use (default: from configuration)
        #[arg(short = 'i', long = "index", value_name = "NAME")]
        indexes: Vec<String>,
    },
}

impl Args {
    /// Default log filter for the requested verbosity.
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
