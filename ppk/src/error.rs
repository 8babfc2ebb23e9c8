//! Error types for the ppk packer and unpacker.
//!
//! Only environment and configuration faults are errors. Verification
//! failures are ordinary values recorded in the ledger, so a `PackError`
//! reaching the entry point always means the run could not complete.

use crate::config::ConfigError;
use crate::index::IndexError;
use crate::naming::NamingError;
use crate::vulnerability::VulnerabilityError;
use thiserror::Error;

/// Errors that abort a packing or unpacking run.
#[derive(Debug, Error)]
pub enum PackError {
    /// The package index did not answer any reachability probe.
    #[error("{url} is not accessible; is the system online?")]
    IndexUnreachable {
        /// Base URL of the index that was probed.
        url: String,
    },

    /// A package index query failed for a reason other than a missing record.
    #[error("package index query failed")]
    Index(#[from] IndexError),

    /// The vulnerability source could not be queried.
    ///
    /// This is fatal: reporting a pass without an answer would be unsafe.
    #[error("vulnerability lookup failed")]
    Vulnerability(#[from] VulnerabilityError),

    /// A configured verification test name has no implementation.
    #[error("unknown verification test \"{name}\"; expected one of: {expected}")]
    UnknownTest {
        /// The rejected test name.
        name: String,
        /// Comma-separated list of known test names.
        expected: String,
    },

    /// The configuration file is missing or invalid.
    #[error("configuration error")]
    Config(#[from] ConfigError),

    /// A filename did not follow the expected naming convention.
    #[error("naming error")]
    Naming(#[from] NamingError),

    /// An external program could not be launched or did not finish in time.
    #[error("failed to run {program}: {reason}")]
    CommandFailed {
        /// Program that was invoked.
        program: String,
        /// Description of the failure.
        reason: String,
    },

    /// The archiver exited with a non-zero status.
    #[error("archiver exited with code {code}\nOutput from subprocess ...\n{output}")]
    Archive {
        /// Exit code reported by the archiver.
        code: i32,
        /// Captured stdout and stderr, verbatim.
        output: String,
    },

    /// A required directory could not be determined.
    #[error("could not determine {what} directory")]
    MissingDirectory {
        /// Which directory was being resolved.
        what: &'static str,
    },

    /// A path could not be represented as UTF-8.
    #[error("path is not valid UTF-8: {path}")]
    NonUtf8Path {
        /// Lossy rendering of the path.
        path: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Test stub received an unexpected or mismatched command invocation.
    #[cfg(any(test, feature = "test-support"))]
    #[error("stub mismatch: {message}")]
    StubMismatch {
        /// Description of what was expected versus what was received.
        message: String,
    },
}

/// Result type alias using [`PackError`].
pub type Result<T> = std::result::Result<T, PackError>;

/// Render an error and every error in its source chain, one per line.
///
/// This is the "full trace" printed by the entry point for fatal faults.
#[must_use]
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut lines = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        lines.push(format!("  caused by: {cause}"));
        source = cause.source();
    }
    lines.join("\n")
}
