//! External command fetcher.
//!
//! Some upstreams are easiest to get at by asking a build tool to produce the
//! document, e.g. `nix build <flake>#docs-json --print-out-paths`. The command
//! prints an output path on stdout, and that path (plus an optional suffix
//! inside it) is the release. Downloading is then just opening the file.

use crate::error::{ErrorKind, Result};
use crate::models::IndexMetadata;
use crate::read::open_document;
use crate::source::{BoxSyncRead, Fetcher};
use async_trait::async_trait;
use exn::ResultExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Time-based fetcher that resolves releases by running a command.
///
/// # Examples
///
/// ```no_run
/// use pkgdex_fetch::CommandFetcher;
///
/// let fetcher = CommandFetcher::new("home-manager", "nix")
///     .args([
///         "build",
///         "github:nix-community/home-manager/master#docs-json",
///         "--no-write-lock-file",
///         "--no-link",
///         "--print-out-paths",
///     ])
///     .suffix("share/doc/home-manager/options.json")
///     .wrapped();
/// ```
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    name: String,
    program: String,
    args: Vec<String>,
    suffix: Option<PathBuf>,
    wrap: bool,
}

impl CommandFetcher {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            suffix: None,
            wrap: false,
        }
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Path of the document relative to the command's printed output path.
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<PathBuf>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// Treat the document as a bare package set.
    #[must_use]
    pub fn wrapped(mut self) -> Self {
        self.wrap = true;
        self
    }

    fn release_from_stdout(&self, stdout: Vec<u8>) -> Result<String> {
        let stdout = String::from_utf8(stdout).or_raise(|| ErrorKind::InvalidRelease)?;
        // Multiple outputs print one path per line; the first one is the default output.
        let Some(output) = stdout.lines().map(str::trim).find(|line| !line.is_empty()) else {
            exn::bail!(ErrorKind::InvalidRelease);
        };
        let path = match &self.suffix {
            Some(suffix) => Path::new(output).join(suffix),
            None => PathBuf::from(output),
        };
        if !path.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(path));
        }
        match path.into_os_string().into_string() {
            Ok(release) => Ok(release),
            Err(path) => exn::bail!(ErrorKind::InvalidPath(PathBuf::from(path))),
        }
    }
}

#[async_trait]
impl Fetcher for CommandFetcher {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(index = %self.name, program = %self.program))]
    async fn latest_release(&self, cancel: &CancellationToken, _metadata: &IndexMetadata) -> Result<String> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on cancellation must not leave a build running.
            .kill_on_drop(true);
        let output = tokio::select! {
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            output = command.output() => output.or_raise(|| ErrorKind::Command(self.program.clone()))?,
        };
        if !output.status.success() {
            tracing::warn!(
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "release command exited unsuccessfully",
            );
            exn::bail!(ErrorKind::Command(format!("{} ({})", self.program, output.status)));
        }
        self.release_from_stdout(output.stdout)
    }

    async fn download_release(&self, cancel: &CancellationToken, release: &str) -> Result<BoxSyncRead> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        open_document(Path::new(release), self.wrap).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/nix/store/abc-docs\n", None, "/nix/store/abc-docs")]
    #[case("/nix/store/abc-docs\n", Some("share/doc/options.json"), "/nix/store/abc-docs/share/doc/options.json")]
    #[case("\n  /nix/store/out\n/nix/store/dev\n", None, "/nix/store/out")]
    fn test_release_from_stdout(#[case] stdout: &str, #[case] suffix: Option<&str>, #[case] expected: &str) {
        let mut fetcher = CommandFetcher::new("name", "nix");
        if let Some(suffix) = suffix {
            fetcher = fetcher.suffix(suffix);
        }
        assert_eq!(fetcher.release_from_stdout(stdout.as_bytes().to_vec()).unwrap(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("   \n")]
    #[case("relative/path\n")]
    fn test_release_from_stdout_invalid(#[case] stdout: &str) {
        let fetcher = CommandFetcher::new("name", "nix");
        assert!(fetcher.release_from_stdout(stdout.as_bytes().to_vec()).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_latest_release_runs_command() {
        let fetcher = CommandFetcher::new("name", "echo").args(["/tmp/out"]).suffix("options.json");
        let release = fetcher.latest_release(&CancellationToken::new(), &IndexMetadata::default()).await.unwrap();
        assert_eq!(release, "/tmp/out/options.json");
        assert_eq!(fetcher.identity(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command() {
        let fetcher = CommandFetcher::new("name", "false");
        let err = fetcher.latest_release(&CancellationToken::new(), &IndexMetadata::default()).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Command(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_command() {
        let fetcher = CommandFetcher::new("name", "sleep").args(["30"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = fetcher.latest_release(&cancel, &IndexMetadata::default()).await.unwrap_err();
        assert!(matches!(*err, ErrorKind::Cancelled));
    }
}
