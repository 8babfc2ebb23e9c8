//! Artifact verification.
//!
//! Each configured test runs against every downloaded artifact and reports a
//! [`TestOutcome`]: a pass flag followed by supporting values. Tests are
//! looked up by name once, when the [`TestRegistry`] is built, so a typo in
//! the configuration fails before anything is downloaded.

use crate::digest::Sha256Digest;
use crate::error::{PackError, Result};
use crate::index::PackageIndex;
use crate::naming::{Artifact, parse_artifact_filename};
use crate::output::{VulnerabilityRow, no_vulnerabilities_message, vulnerability_report, write_stderr_line};
use crate::vulnerability::{SeverityCounts, VulnerabilitySource};
use std::io::Write;
use std::path::Path;

/// Name of the published-digest comparison test.
pub const CHECKSUM_TEST: &str = "checksum";

/// Name of the known-vulnerability test.
pub const VULNERABILITY_TEST: &str = "vulnerability";

/// Every test name the registry accepts.
pub const KNOWN_TESTS: [&str; 2] = [CHECKSUM_TEST, VULNERABILITY_TEST];

/// Result of one test against one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// Whether the test passed.
    pub passed: bool,
    /// Supporting values, logged after the flag.
    pub values: Vec<u32>,
}

impl TestOutcome {
    /// An outcome without supporting values.
    #[must_use]
    pub const fn flag(passed: bool) -> Self {
        Self {
            passed,
            values: Vec::new(),
        }
    }

    /// The flag followed by the supporting values, as log fields.
    #[must_use]
    pub fn flattened(&self) -> Vec<String> {
        std::iter::once(self.passed.to_string())
            .chain(self.values.iter().map(u32::to_string))
            .collect()
    }
}

/// A named verification test.
pub trait VerificationTest {
    /// Name used in the configuration file.
    fn name(&self) -> &'static str;

    /// Log header columns; the first is the pass flag.
    fn columns(&self) -> &'static [&'static str];

    /// Run the test against one artifact.
    ///
    /// # Errors
    ///
    /// Returns [`PackError`] when the test cannot produce an answer, for
    /// example because a remote service is unreachable.
    fn run(&self, artifact: &Artifact, out: &mut dyn Write) -> Result<TestOutcome>;

    /// Failing outcome recorded for files whose name cannot be parsed.
    fn unrecognised(&self) -> TestOutcome {
        TestOutcome {
            passed: false,
            values: vec![0; self.columns().len().saturating_sub(1)],
        }
    }
}

/// Compares the local SHA-256 with the digest the index publishes.
pub struct ChecksumTest<'a> {
    index: &'a dyn PackageIndex,
}

impl<'a> ChecksumTest<'a> {
    /// Test backed by `index`.
    #[must_use]
    pub fn new(index: &'a dyn PackageIndex) -> Self {
        Self { index }
    }
}

impl VerificationTest for ChecksumTest<'_> {
    fn name(&self) -> &'static str {
        CHECKSUM_TEST
    }

    fn columns(&self) -> &'static [&'static str] {
        &["checksum"]
    }

    fn run(&self, artifact: &Artifact, out: &mut dyn Write) -> Result<TestOutcome> {
        let Some(files) = self.index.release_files(artifact.name(), artifact.version())? else {
            write_stderr_line(
                out,
                format!(
                    "{} {} is not published on the index",
                    artifact.name(),
                    artifact.version()
                ),
            );
            return Ok(TestOutcome::flag(false));
        };
        let Some(published) = files.iter().find(|f| f.filename == artifact.filename()) else {
            write_stderr_line(
                out,
                format!("{} has no published digest", artifact.filename()),
            );
            return Ok(TestOutcome::flag(false));
        };

        let local = Sha256Digest::of_file(artifact.path())?;
        let passed = local == published.sha256;
        if !passed {
            write_stderr_line(
                out,
                format!(
                    "{}: checksum mismatch (expected {}, got {local})",
                    artifact.filename(),
                    published.sha256
                ),
            );
        }
        Ok(TestOutcome::flag(passed))
    }
}

/// Fails artifacts with critical or high severity advisories.
pub struct VulnerabilityTest<'a> {
    source: &'a dyn VulnerabilitySource,
    verbose: bool,
}

impl<'a> VulnerabilityTest<'a> {
    /// Test backed by `source`; `verbose` prints advisory details.
    #[must_use]
    pub fn new(source: &'a dyn VulnerabilitySource, verbose: bool) -> Self {
        Self { source, verbose }
    }

    fn report(&self, artifact: &Artifact, count: usize, ids: &[String]) -> Result<String> {
        let (name, version) = (artifact.name(), artifact.version());
        if count == 0 {
            return Ok(no_vulnerabilities_message(name, version));
        }
        if !self.verbose {
            return Ok(format!(
                "{name} v{version} has {count} reported direct vulnerabilities."
            ));
        }
        let rows = ids
            .iter()
            .map(|id| {
                let detail = self.source.advisory(id)?;
                Ok(VulnerabilityRow {
                    severity: detail
                        .severity
                        .map_or_else(|| "UNRATED".to_owned(), |s| s.to_string()),
                    title: detail.title,
                    versions: detail.versions,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(vulnerability_report(name, version, &rows))
    }
}

impl VerificationTest for VulnerabilityTest<'_> {
    fn name(&self) -> &'static str {
        VULNERABILITY_TEST
    }

    fn columns(&self) -> &'static [&'static str] {
        &["vuln", "dv_c", "dv_h", "dv_m", "dv_l"]
    }

    fn run(&self, artifact: &Artifact, out: &mut dyn Write) -> Result<TestOutcome> {
        let advisories = self
            .source
            .direct_vulnerabilities(artifact.name(), artifact.version())?;
        let counts = SeverityCounts::tally(&advisories);
        let ids: Vec<String> = advisories.into_iter().map(|a| a.id).collect();
        write_stderr_line(out, self.report(artifact, ids.len(), &ids)?);
        Ok(TestOutcome {
            passed: counts.passes(),
            values: counts.values().to_vec(),
        })
    }
}

/// Collaborators the built-in tests need.
#[derive(Clone, Copy)]
pub struct TestDeps<'a> {
    /// Package index for published digests.
    pub index: &'a dyn PackageIndex,
    /// Vulnerability database.
    pub vulnerabilities: &'a dyn VulnerabilitySource,
    /// Print vulnerability detail tables.
    pub verbose: bool,
}

/// The configured tests, in run order.
pub struct TestRegistry<'a> {
    tests: Vec<Box<dyn VerificationTest + 'a>>,
}

impl<'a> TestRegistry<'a> {
    /// Resolve configured test names to implementations.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::UnknownTest`] for a name without an
    /// implementation, including an empty list.
    pub fn from_names<S: AsRef<str>>(names: &[S], deps: TestDeps<'a>) -> Result<Self> {
        if names.is_empty() {
            return Err(unknown_test(""));
        }
        let tests = names
            .iter()
            .map(|name| -> Result<Box<dyn VerificationTest + 'a>> {
                match name.as_ref().trim() {
                    CHECKSUM_TEST => Ok(Box::new(ChecksumTest::new(deps.index))),
                    VULNERABILITY_TEST => Ok(Box::new(VulnerabilityTest::new(
                        deps.vulnerabilities,
                        deps.verbose,
                    ))),
                    other => Err(unknown_test(other)),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tests })
    }

    /// Registry over explicit test implementations.
    #[must_use]
    pub fn from_tests(tests: Vec<Box<dyn VerificationTest + 'a>>) -> Self {
        Self { tests }
    }

    /// Log columns of every test, in run order.
    #[must_use]
    pub fn columns(&self) -> Vec<&'static str> {
        self.tests
            .iter()
            .flat_map(|t| t.columns().iter().copied())
            .collect()
    }

    /// Names of the configured tests, in run order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tests.iter().map(|t| t.name()).collect()
    }
}

fn unknown_test(name: &str) -> PackError {
    PackError::UnknownTest {
        name: name.to_owned(),
        expected: KNOWN_TESTS.join(", "),
    }
}

/// Every test's outcome for one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactResult {
    /// Artifact filename.
    pub filename: String,
    /// One outcome per configured test, in run order.
    pub outcomes: Vec<TestOutcome>,
}

impl ArtifactResult {
    /// True iff every test passed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// All outcomes flattened into log fields.
    #[must_use]
    pub fn flattened(&self) -> Vec<String> {
        self.outcomes.iter().flat_map(TestOutcome::flattened).collect()
    }
}

/// Run every configured test against the file at `path`.
///
/// A filename that does not parse yields a failing result for every test
/// instead of an error.
///
/// # Errors
///
/// Propagates the first fatal error raised by a test.
pub fn verify_artifact(
    path: &Path,
    registry: &TestRegistry<'_>,
    out: &mut dyn Write,
) -> Result<ArtifactResult> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let artifact = match parse_artifact_filename(path) {
        Ok(artifact) => artifact,
        Err(e) => {
            log::warn!("{e}");
            write_stderr_line(out, format!("Cannot verify {filename}: {e}"));
            return Ok(ArtifactResult {
                filename,
                outcomes: registry.tests.iter().map(|t| t.unrecognised()).collect(),
            });
        }
    };

    log::info!("verifying {filename}");
    let outcomes = registry
        .tests
        .iter()
        .map(|test| test.run(&artifact, out))
        .collect::<Result<Vec<_>>>()?;
    Ok(ArtifactResult { filename, outcomes })
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
