//! Verification log and integrity key.
//!
//! The log is a CSV-like file with one row per artifact followed by the
//! run-wide result. Its SHA-256 is written to a sibling key file so the
//! receiving side can detect edits to the log.

use crate::digest::Sha256Digest;
use crate::error::Result;
use crate::host::HostInfo;
use crate::verify::ArtifactResult;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Timestamp layout of the `datetime` column.
pub const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Suffix shared by the log and key filenames.
const FILE_SUFFIX: &str = "__verification";

/// Run-wide verification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every test passed for every artifact.
    Pass,
    /// At least one test failed.
    Fail,
}

impl RunOutcome {
    /// Logical AND over every artifact's result.
    ///
    /// An empty run passes; the pipeline never verifies zero artifacts in
    /// package mode because the target itself must be present.
    #[must_use]
    pub fn from_results(results: &[ArtifactResult]) -> Self {
        if results.iter().all(ArtifactResult::passed) {
            Self::Pass
        } else {
            Self::Fail
        }
    }

    /// True for [`RunOutcome::Pass`].
    #[must_use]
    pub const fn passed(self) -> bool {
        matches!(self, Self::Pass)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        })
    }
}

/// Paths of the files written for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerFiles {
    /// `{stem}__verification.log`.
    pub log: PathBuf,
    /// `{stem}__verification.key`.
    pub key: PathBuf,
}

impl LedgerFiles {
    /// File locations for archive stem `stem` in `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path, stem: &str) -> Self {
        Self {
            log: dir.join(format!("{stem}{FILE_SUFFIX}.log")),
            key: dir.join(format!("{stem}{FILE_SUFFIX}.key")),
        }
    }
}

/// Writer for the verification log of one run.
#[derive(Debug, Clone)]
pub struct Ledger<'a> {
    columns: Vec<&'static str>,
    host: &'a HostInfo,
    timestamp: String,
}

impl<'a> Ledger<'a> {
    /// Ledger with the given test columns, stamped with `timestamp`.
    #[must_use]
    pub fn new(columns: Vec<&'static str>, host: &'a HostInfo, timestamp: String) -> Self {
        Self {
            columns,
            host,
            timestamp,
        }
    }

    /// The header line, without a trailing newline.
    #[must_use]
    pub fn header(&self) -> String {
        format!(
            "datetime,host,user,package,{},result",
            self.columns.join(",")
        )
    }

    /// One row for one artifact, without a trailing newline.
    #[must_use]
    pub fn row(&self, result: &ArtifactResult) -> String {
        let mut fields = vec![
            self.timestamp.clone(),
            self.host.hostname.clone(),
            self.host.username.clone(),
            result.filename.clone(),
        ];
        fields.extend(result.flattened());
        fields.push(if result.passed() { "pass" } else { "fail" }.to_owned());
        fields.join(",")
    }

    /// Full log text for `results`, ending with the run-wide result.
    ///
    /// # Example
    ///
    /// ```
    /// use ppk::host::HostInfo;
    /// use ppk::ledger::Ledger;
    /// use ppk::verify::{ArtifactResult, TestOutcome};
    ///
    /// let host = HostInfo::new("build01", "jo");
    /// let ledger = Ledger::new(vec!["checksum"], &host, "2024-03-09 14:05".to_owned());
    /// let results = vec![ArtifactResult {
    ///     filename: "six-1.16.0-py2.py3-none-any.whl".to_owned(),
    ///     outcomes: vec![TestOutcome::flag(true)],
    /// }];
    /// let text = ledger.render(&results);
    /// assert!(text.ends_with("\nResult: PASS\n"));
    /// ```
    #[must_use]
    pub fn render(&self, results: &[ArtifactResult]) -> String {
        let mut text = self.header();
        text.push('\n');
        for result in results {
            text.push_str(&self.row(result));
            text.push('\n');
        }
        text.push_str(&format!("\nResult: {}\n", RunOutcome::from_results(results)));
        text
    }

    /// Write the log and then its key file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PackError::Io`] if either file cannot be
    /// written.
    pub fn write(
        &self,
        dir: &Path,
        stem: &str,
        results: &[ArtifactResult],
    ) -> Result<(RunOutcome, LedgerFiles)> {
        let files = LedgerFiles::in_dir(dir, stem);
        {
            let mut log = fs::File::create(&files.log)?;
            log.write_all(self.render(results).as_bytes())?;
            log.sync_all()?;
        }
        let key = Sha256Digest::of_file(&files.log)?;
        fs::write(&files.key, key.as_str())?;
        log::debug!("wrote {} and {}", files.log.display(), files.key.display());
        Ok((RunOutcome::from_results(results), files))
    }
}
