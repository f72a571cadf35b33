//! Configuration for pkgdex.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. built-in defaults,
//! 2. `config.toml`, `config.json` and `config.yaml` in the user's config
//!    directory, or only the file given explicitly,
//! 3. `PKGDEX_*` environment variables (nested keys separated by `__`,
//!    e.g. `PKGDEX_SOURCES__OPTIONS__PATH`).
//!
//! ```toml
//! update_interval = "7d"
//! indexes = ["home-manager", "options"]
//!
//! [sources.options]
//! kind = "file"
//! path = "/etc/pkgdex/options.json"
//! wrap = true
//!
//! [sources.home-manager]
//! kind = "command"
//! program = "nix"
//! args = ["build", "github:nix-community/home-manager#docs-json", "--no-link", "--print-out-paths"]
//! suffix = "share/doc/home-manager/options.json"
//! wrap = true
//! ```

mod duration;
pub mod error;

pub use crate::duration::{format_duration, parse_duration};
use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APPLICATION: &str = "pkgdex";
/// Prefix of the environment variables read into the configuration.
pub const ENV_PREFIX: &str = "PKGDEX_";
/// Environment variable holding the log filter; not a configuration key.
pub const LOG_ENV: &str = "PKGDEX_LOG";
/// Environment variable naming the config file; not a configuration key.
pub const CONFIG_ENV: &str = "PKGDEX_CONFIG";
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const CONFIG_FILES: [&str; 3] = ["config.toml", "config.json", "config.yaml"];

/// Where an index's documents come from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase", deny_unknown_fields)]
pub enum Source {
    /// A local document; the path is the release.
    File {
        path: PathBuf,
        /// The document is a bare package set rather than `{"packages": ...}`.
        #[serde(default)]
        wrap: bool,
    },
    /// A command printing the path of a freshly built document.
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// Location of the document relative to the printed path.
        #[serde(default)]
        suffix: Option<PathBuf>,
        #[serde(default)]
        wrap: bool,
    },
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of every index namespace.
    pub cache_dir: PathBuf,
    /// How long a time-based index stays fresh.
    pub update_interval: Duration,
    /// Indexes used when a command doesn't name any. Empty means all sources.
    pub indexes: Vec<String>,
    pub sources: BTreeMap<String, Source>,
}

/// Shape of the merged configuration sources, before defaults that can fail
/// to resolve are filled in.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    cache_dir: Option<PathBuf>,
    #[serde(default = "default_update_interval", deserialize_with = "duration::deserialize")]
    update_interval: Duration,
    #[serde(default)]
    indexes: Vec<String>,
    #[serde(default)]
    sources: BTreeMap<String, Source>,
}

fn default_update_interval() -> Duration {
    DEFAULT_UPDATE_INTERVAL
}

impl Config {
    /// Load from the default locations, or from `path` only if given.
    ///
    /// # Errors
    ///
    /// An explicitly given file that doesn't exist is
    /// [`Invalid`](ErrorKind::Invalid); missing files in the default
    /// locations are skipped.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", APPLICATION);
        let mut figment = Figment::new();
        match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::Invalid(format!("config file {} does not exist", path.display())));
                }
                figment = merge_file(figment, path);
            },
            None => {
                if let Some(dirs) = &dirs {
                    for name in CONFIG_FILES {
                        figment = merge_file(figment, &dirs.config_dir().join(name));
                    }
                }
            },
        }
        figment = figment.merge(environment());
        Self::from_figment(&figment, dirs.as_ref().map(|dirs| dirs.cache_dir()))
    }

    /// Extract and validate a configuration from an already assembled
    /// figment. `default_cache_dir` is used when none is configured.
    pub fn from_figment(figment: &Figment, default_cache_dir: Option<&Path>) -> Result<Self> {
        let raw: RawConfig = figment.extract().or_raise(|| ErrorKind::Load)?;
        let cache_dir = match raw.cache_dir.or_else(|| default_cache_dir.map(Path::to_path_buf)) {
            Some(cache_dir) => cache_dir,
            None => exn::bail!(ErrorKind::NoHomeDirectory),
        };
        let config = Self {
            cache_dir,
            update_interval: raw.update_interval,
            indexes: raw.indexes,
            sources: raw.sources,
        };
        config.validate()?;
        tracing::debug!(cache_dir = %config.cache_dir.display(), sources = config.sources.len(), "loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.update_interval.is_zero() {
            exn::bail!(ErrorKind::Invalid("update_interval must be greater than zero".into()));
        }
        if !self.cache_dir.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!("cache_dir {} is not absolute", self.cache_dir.display())));
        }
        for name in self.indexes.iter().chain(self.sources.keys()) {
            if name.trim().is_empty() {
                exn::bail!(ErrorKind::Invalid("index names must not be empty".into()));
            }
            if name.contains(['/', '\\']) || name == "." || name == ".." {
                exn::bail!(ErrorKind::Invalid(format!("index name {name:?} is not a valid directory name")));
            }
        }
        for (name, source) in &self.sources {
            if let Source::File { path, .. } = source
                && !path.is_absolute()
            {
                exn::bail!(ErrorKind::Invalid(format!("source {name:?}: path {} is not absolute", path.display())));
            }
        }
        Ok(())
    }

    /// The configured default indexes, or every source if none are listed.
    pub fn index_names(&self) -> Vec<String> {
        if self.indexes.is_empty() {
            self.sources.keys().cloned().collect()
        } else {
            self.indexes.clone()
        }
    }
}

fn environment() -> Env {
    // Keys are matched after the prefix is stripped, case-insensitively.
    Env::prefixed(ENV_PREFIX).ignore(&["log", "config"]).split("__")
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}
