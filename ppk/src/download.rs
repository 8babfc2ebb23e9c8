//! Package download via `pip download`.
//!
//! The download tool runs as a subprocess through [`CommandExecutor`]. In
//! requirements mode a "no matching distribution" failure is retried once
//! with a working copy of the requirements file that asks for the source
//! distribution of the offending package.

use crate::error::{PackError, Result};
use crate::exec::CommandExecutor;
use crate::output::write_stderr_line;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// pip's message when no artifact satisfies a requirement.
const NO_MATCHING_DISTRIBUTION: &str = "no matching distribution found for ";

/// What to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadTarget<'a> {
    /// A package specification such as `pandas` or `pandas==2.1.1`.
    Package(&'a str),
    /// A requirements file.
    Requirements(&'a Path),
}

/// Optional `pip download` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipOptions<'a> {
    /// Simple index URL; `None` uses pip's own configuration.
    pub index_url: Option<&'a str>,
    /// Target platform tag.
    pub platform: Option<&'a str>,
    /// Target interpreter version, e.g. `311`.
    pub python_version: Option<&'a str>,
    /// Only accept built distributions.
    pub only_binary: bool,
    /// Do not download dependencies.
    pub no_deps: bool,
}

/// Result of a download attempt.
#[derive(Debug)]
pub struct DownloadReport {
    /// Whether pip finally exited successfully.
    pub succeeded: bool,
    /// Working copy of the requirements file used by the retry, if any.
    pub amended_requirements: Option<NamedTempFile>,
}

/// Build the `pip download` argument list.
///
/// pip refuses `--platform` and `--python-version` without
/// `--only-binary :all:` unless dependencies are skipped, so one of the two
/// is always added alongside them.
///
/// # Errors
///
/// Returns [`PackError::NonUtf8Path`] when a path is not valid UTF-8.
///
/// # Examples
///
/// ```
/// use ppk::download::{DownloadTarget, PipOptions, pip_args};
/// use std::path::Path;
///
/// let options = PipOptions { platform: Some("win_amd64"), ..PipOptions::default() };
/// let args = pip_args(Path::new("/tmp/ws"), DownloadTarget::Package("six"), &options)
///     .expect("UTF-8 paths");
/// assert_eq!(
///     args,
///     ["download", "-d", "/tmp/ws", "six", "--platform", "win_amd64", "--only-binary", ":all:"]
/// );
/// ```
pub fn pip_args(
    dest: &Path,
    target: DownloadTarget<'_>,
    options: &PipOptions<'_>,
) -> Result<Vec<String>> {
    let mut args = vec!["download".to_owned(), "-d".to_owned(), utf8(dest)?.to_owned()];
    match target {
        DownloadTarget::Package(spec) => args.push(spec.to_owned()),
        DownloadTarget::Requirements(path) => {
            args.push("-r".to_owned());
            args.push(utf8(path)?.to_owned());
        }
    }
    if let Some(url) = options.index_url {
        args.extend(["-i".to_owned(), url.to_owned()]);
    }
    if let Some(platform) = options.platform {
        args.extend(["--platform".to_owned(), platform.to_owned()]);
    }
    if let Some(version) = options.python_version {
        args.extend(["--python-version".to_owned(), version.to_owned()]);
    }
    let binary_only =
        options.only_binary || options.platform.is_some() || options.python_version.is_some();
    if options.no_deps {
        args.push("--no-deps".to_owned());
    } else if binary_only {
        args.extend(["--only-binary".to_owned(), ":all:".to_owned()]);
    }
    Ok(args)
}

fn utf8(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| PackError::NonUtf8Path {
        path: path.display().to_string(),
    })
}

/// Extract the package name from pip's "no matching distribution" error.
///
/// # Examples
///
/// ```
/// use ppk::download::missing_distribution;
///
/// let stderr = "ERROR: No matching distribution found for pyyaml==5.3";
/// assert_eq!(missing_distribution(stderr).as_deref(), Some("pyyaml"));
/// ```
#[must_use]
pub fn missing_distribution(stderr: &str) -> Option<String> {
    let lower = stderr.to_ascii_lowercase();
    let start = lower.find(NO_MATCHING_DISTRIBUTION)? + NO_MATCHING_DISTRIBUTION.len();
    let name: String = stderr
        .get(start..)?
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    let name = name.trim_end_matches('.');
    (!name.is_empty()).then(|| name.to_owned())
}

/// Copy `original` to a temporary file and append `--no-binary=<package>`.
///
/// The user's file is never modified.
///
/// # Errors
///
/// Returns [`PackError::Io`] if the copy cannot be written.
pub fn amend_requirements(original: &Path, package: &str) -> Result<NamedTempFile> {
    let mut contents = fs::read_to_string(original)?;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&format!("--no-binary={package}\n"));
    let mut copy = tempfile::Builder::new()
        .prefix("ppk-requirements-")
        .suffix(".txt")
        .tempfile()?;
    copy.write_all(contents.as_bytes())?;
    copy.flush()?;
    Ok(copy)
}

/// Runs `pip download` through an executor.
pub struct Downloader<'a> {
    executor: &'a dyn CommandExecutor,
    pip: &'a str,
}

impl<'a> Downloader<'a> {
    /// Downloader invoking the `pip` program through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, pip: &'a str) -> Self {
        Self { executor, pip }
    }

    /// Download `target` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::CommandFailed`] if pip cannot be launched and
    /// [`PackError::Io`] if the amended requirements file cannot be written.
    /// A pip failure is reported through [`DownloadReport::succeeded`].
    pub fn download(
        &self,
        dest: &Path,
        target: DownloadTarget<'_>,
        options: &PipOptions<'_>,
        out: &mut dyn Write,
    ) -> Result<DownloadReport> {
        let stderr = match self.run_pip(dest, target, options, out)? {
            None => {
                return Ok(DownloadReport {
                    succeeded: true,
                    amended_requirements: None,
                });
            }
            Some(stderr) => stderr,
        };
        write_stderr_line(out, stderr.trim_end());

        let (DownloadTarget::Requirements(original), Some(package)) =
            (target, missing_distribution(&stderr))
        else {
            write_stderr_line(out, "An error was thrown from pip.");
            return Ok(DownloadReport {
                succeeded: false,
                amended_requirements: None,
            });
        };

        write_stderr_line(
            out,
            format!("Amending the requirements file and trying again for {package} ..."),
        );
        let amended = amend_requirements(original, &package)?;
        let retry = self.run_pip(
            dest,
            DownloadTarget::Requirements(amended.path()),
            options,
            out,
        )?;
        if let Some(stderr) = &retry {
            write_stderr_line(out, stderr.trim_end());
            write_stderr_line(out, "An error was thrown from pip.");
        }
        Ok(DownloadReport {
            succeeded: retry.is_none(),
            amended_requirements: Some(amended),
        })
    }

    /// Run pip once, echoing its progress output to `out`; `Some(stderr)`
    /// on a non-zero exit.
    fn run_pip(
        &self,
        dest: &Path,
        target: DownloadTarget<'_>,
        options: &PipOptions<'_>,
        out: &mut dyn Write,
    ) -> Result<Option<String>> {
        let args = pip_args(dest, target, options)?;
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.executor.run(self.pip, &arg_refs)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let progress = stdout.trim_end();
        if !progress.is_empty() {
            write_stderr_line(out, progress);
        }
        if output.status.success() {
            Ok(None)
        } else {
            Ok(Some(String::from_utf8_lossy(&output.stderr).into_owned()))
        }
    }
}
