//! CLI argument definitions for ppk.
//!
//! This module defines the command-line interface using clap. It is separated
//! from the main entrypoint to keep the binary small and focused on
//! orchestration.

use crate::pipeline::PackRequest;
use camino::Utf8PathBuf;
use clap::Parser;

/// Download, verify and pack Python packages for transfer.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "ppk")]
#[command(version, about)]
#[command(long_about = concat!(
    "Download, verify and pack Python packages for transfer.\n\n",
    "ppk downloads a package (or every package of a requirements file) with pip, ",
    "checks each file's SHA-256 against the digest published by the index, looks ",
    "up known vulnerabilities, and writes a verification log. When every file ",
    "passes, the files and the log are sealed into an encrypted .7z archive.\n\n",
    "With --unpack, PACKAGE is an archive produced by ppk; it is handed to the ",
    "unpack binary, and the local mirror is refreshed afterwards.",
))]
#[command(after_help = concat!(
    "EXAMPLES:\n",
    "  Pack a single package and its dependencies:\n",
    "    $ ppk pandas\n\n",
    "  Pack a pinned version for a Windows target:\n",
    "    $ ppk 'pandas==2.1.1' --platform win_amd64 --python-version 311\n\n",
    "  Pack a requirements file without one of its packages:\n",
    "    $ ppk -r requirements.txt -x packaging\n\n",
    "  Unpack an archive in the destination environment:\n",
    "    $ ppk -u pandas-2.1.1-cp311-cp311-win_amd64-311.7z",
))]
pub struct Cli {
    /// Package specification, requirements file (-r) or archive (-u).
    #[arg(value_name = "PACKAGE")]
    pub target: String,

    /// Treat PACKAGE as a requirements file.
    #[arg(short = 'r', long = "from-req", conflicts_with = "unpack")]
    pub from_requirements: bool,

    /// Download for this platform tag (e.g. `win_amd64`).
    #[arg(long, value_name = "TAG")]
    pub platform: Option<String>,

    /// Download for this interpreter version (e.g. `311`).
    #[arg(long, value_name = "VER")]
    pub python_version: Option<String>,

    /// Use pip's configured index instead of the configured simple index.
    #[arg(long = "use-local")]
    pub use_local_index: bool,

    /// Only download built distributions (wheels).
    #[arg(long)]
    pub only_binary: bool,

    /// Do not download dependencies.
    #[arg(long)]
    pub no_deps: bool,

    /// Keep the download workspace after a passing run.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Drop a package before verification (can be repeated).
    #[arg(short = 'x', long, value_name = "NAME", num_args = 1..)]
    pub exclude: Vec<String>,

    /// Unpack the archive given as PACKAGE.
    #[arg(short, long)]
    pub unpack: bool,

    /// Configuration file [default: platform config directory].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<Utf8PathBuf>,

    /// Increase log verbosity (repeatable: -v, -vv, -vvv).
    #[arg(
        short,
        long = "verbose",
        action = clap::ArgAction::Count,
        conflicts_with = "quiet"
    )]
    pub verbosity: u8,

    /// Suppress progress output (errors still shown).
    #[arg(short, long, conflicts_with = "verbosity")]
    pub quiet: bool,
}

impl Default for Cli {
    /// A package-mode invocation with every flag off and an empty target.
    fn default() -> Self {
        Self {
            target: String::new(),
            from_requirements: false,
            platform: None,
            python_version: None,
            use_local_index: false,
            only_binary: false,
            no_deps: false,
            no_cleanup: false,
            exclude: Vec::new(),
            unpack: false,
            config: None,
            verbosity: 0,
            quiet: false,
        }
    }
}

impl Cli {
    /// The packaging request described by these arguments.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppk::cli::Cli;
    ///
    /// let cli = Cli {
    ///     target: "requirements.txt".to_owned(),
    ///     from_requirements: true,
    ///     exclude: vec!["packaging".to_owned()],
    ///     ..Cli::default()
    /// };
    /// let request = cli.pack_request();
    /// assert!(request.from_requirements);
    /// assert_eq!(request.exclude, ["packaging"]);
    /// ```
    #[must_use]
    pub fn pack_request(&self) -> PackRequest {
        PackRequest {
            target: self.target.clone(),
            from_requirements: self.from_requirements,
            platform: self.platform.clone(),
            python_version: self.python_version.clone(),
            use_local_index: self.use_local_index,
            only_binary: self.only_binary,
            no_deps: self.no_deps,
            exclude: self.exclude.clone(),
            no_cleanup: self.no_cleanup,
        }
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
