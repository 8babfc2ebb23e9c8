//! Terminal output for the packer.
//!
//! Progress lines go to an injected writer (stderr in production, a
//! `Vec<u8>` in tests). Quiet mode hands the pipeline a sink instead.

use camino::Utf8Path;
use std::fmt::{self, Display};
use std::io::Write;
use std::path::Path;

/// Write one line, ignoring write failures.
pub fn write_stderr_line(out: &mut dyn Write, message: impl Display) {
    if writeln!(out, "{message}").is_err() {
        // Best-effort output; ignore write failures.
    }
}

/// One row of the verbose vulnerability table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VulnerabilityRow {
    /// Severity label, e.g. `HIGH`.
    pub severity: String,
    /// Short description.
    pub title: String,
    /// Affected version ranges.
    pub versions: String,
}

/// Render the direct vulnerability table for one package version.
///
/// # Example
///
/// ```
/// use ppk::output::{VulnerabilityRow, vulnerability_report};
///
/// let rows = vec![VulnerabilityRow {
///     severity: "HIGH".to_owned(),
///     title: "Remote code execution".to_owned(),
///     versions: "<1.2.0".to_owned(),
/// }];
/// let text = vulnerability_report("pyyaml", "5.3", &rows);
/// assert!(text.contains("Severity"));
/// assert!(text.contains("Remote code execution"));
/// ```
#[must_use]
pub fn vulnerability_report(name: &str, version: &str, rows: &[VulnerabilityRow]) -> String {
    if rows.is_empty() {
        return no_vulnerabilities_message(name, version);
    }
    let mut lines = vec![
        String::new(),
        format!("{name} v{version} has the following reported direct vulnerabilities:"),
        String::new(),
        table_row("Severity", "Title", "Versions"),
        table_row("--------", "-----", "--------"),
    ];
    lines.extend(
        rows.iter()
            .map(|r| table_row(&r.severity, &r.title, &r.versions)),
    );
    lines.join("\n")
}

/// Message printed when a package version has no direct vulnerabilities.
#[must_use]
pub fn no_vulnerabilities_message(name: &str, version: &str) -> String {
    format!("{name} v{version} has no reported direct vulnerabilities.")
}

fn table_row(severity: &str, title: &str, versions: &str) -> String {
    format!("{severity:10}{title:40}{versions:25}")
        .trim_end()
        .to_owned()
}

/// End-of-run report.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary<'a> {
    /// Package name, or the requirements file for requirements mode.
    pub target: &'a str,
    /// Whether every verification test passed.
    pub passed: bool,
    /// Destination archive, when one was written.
    pub archive: Option<&'a Utf8Path>,
    /// Workspace preserved for inspection, if any.
    pub workspace: Option<&'a Path>,
}

impl RunSummary<'_> {
    /// Format the summary for display to the user.
    ///
    /// # Example
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use ppk::output::RunSummary;
    ///
    /// let summary = RunSummary {
    ///     target: "six",
    ///     passed: true,
    ///     archive: Some(Utf8Path::new("/home/me/Desktop/six-1.16.0-py2.py3-none-any.7z")),
    ///     workspace: None,
    /// };
    /// assert!(summary.display_text().contains("PASSED"));
    /// ```
    #[must_use]
    pub fn display_text(&self) -> String {
        self.to_string()
    }
}

impl Display for RunSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = if self.passed { "PASSED" } else { "FAILED" };
        writeln!(f)?;
        writeln!(f, "Processing complete.")?;
        writeln!(f, "The {} package has: {flag}", self.target)?;
        if let Some(archive) = self.archive {
            writeln!(f)?;
            writeln!(
                f,
                "An encrypted .7z archive containing the verified packages and the"
            )?;
            writeln!(f, "verification log was written to:")?;
            writeln!(f, "-- {archive}")?;
            writeln!(f, "Transfer it to the destination and unpack it with ppk --unpack.")?;
        }
        if let Some(workspace) = self.workspace {
            writeln!(f)?;
            if self.passed {
                writeln!(f, "The download workspace was kept at:")?;
            } else {
                writeln!(f, "Please check the log file for the failing packages, in:")?;
            }
            writeln!(f, "-- {}", workspace.display())?;
        }
        Ok(())
    }
}
