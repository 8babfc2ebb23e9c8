//! Shared test utilities for ppk.
//!
//! Available to unit tests and, through the `test-support` feature, to the
//! integration and behaviour suites.

use crate::digest::Sha256Digest;
use crate::error::{PackError, Result};
use crate::exec::CommandExecutor;
use crate::index::{IndexError, PackageIndex, ReleaseFile};
use crate::naming::parse_artifact_filename;
use crate::vulnerability::{Advisory, AdvisoryDetail, VulnerabilityError, VulnerabilitySource};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::process::{ExitStatus, Output};

/// Creates an `ExitStatus` from an exit code (Unix implementation).
#[cfg(unix)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    ExitStatus::from_raw(code << 8)
}

/// Creates an `ExitStatus` from an exit code (Windows implementation).
#[cfg(windows)]
#[must_use]
pub fn exit_status(code: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;

    ExitStatus::from_raw(code.cast_unsigned())
}

/// Creates a successful command `Output` with empty stdout and stderr.
#[must_use]
pub fn success_output() -> Output {
    Output {
        status: exit_status(0),
        stdout: Vec::new(),
        stderr: Vec::new(),
    }
}

/// Creates a failed command `Output` with the given stderr message.
#[must_use]
pub fn failure_output(stderr: &str) -> Output {
    Output {
        status: exit_status(1),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

/// A distribution file the scripted download tool "downloads".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeDistribution {
    /// Filename written into the download directory.
    pub filename: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl FakeDistribution {
    /// A distribution whose contents are derived from its filename.
    #[must_use]
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_owned(),
            bytes: format!("contents of {filename}").into_bytes(),
        }
    }

    /// Digest of the contents.
    #[must_use]
    pub fn sha256(&self) -> Sha256Digest {
        Sha256Digest::of_bytes(&self.bytes)
    }
}

/// One scripted response to `pip download`.
#[derive(Debug, Clone)]
pub enum PipStep {
    /// Write the files into the download directory and exit 0.
    Download(Vec<FakeDistribution>),
    /// Exit 1 with the given stderr.
    Fail(String),
}

/// A `CommandExecutor` that simulates `pip download` and `7z a`.
///
/// `pip download -d <dir> ...` consumes the next [`PipStep`]. `7z a` writes
/// a plain-text stand-in archive listing the archived filenames, or exits
/// with the configured failure code. Every invocation is recorded.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    pip_steps: RefCell<VecDeque<PipStep>>,
    archiver_exit: Cell<i32>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedExecutor {
    /// Executor answering successive `pip download` calls with `steps`.
    #[must_use]
    pub fn new(steps: Vec<PipStep>) -> Self {
        Self {
            pip_steps: RefCell::new(steps.into()),
            ..Self::default()
        }
    }

    /// Make the archiver exit with `code`.
    pub fn set_archiver_exit(&self, code: i32) {
        self.archiver_exit.set(code);
    }

    /// Every invocation so far, program first.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }

    /// Invocations whose first argument is `subcommand`.
    #[must_use]
    pub fn calls_for(&self, subcommand: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.get(1).is_some_and(|a| a == subcommand))
            .cloned()
            .collect()
    }

    fn pip_download(&self, args: &[&str]) -> Result<Output> {
        let dest = args
            .iter()
            .position(|a| *a == "-d")
            .and_then(|i| args.get(i + 1))
            .ok_or_else(|| mismatch("pip download without -d"))?;
        match self.pip_steps.borrow_mut().pop_front() {
            Some(PipStep::Download(files)) => {
                for file in files {
                    fs::write(Path::new(dest).join(&file.filename), &file.bytes)?;
                }
                Ok(success_output())
            }
            Some(PipStep::Fail(stderr)) => Ok(failure_output(&stderr)),
            None => Err(mismatch("no scripted pip step left")),
        }
    }

    fn archive(&self, args: &[&str]) -> Result<Output> {
        let code = self.archiver_exit.get();
        if code != 0 {
            return Ok(Output {
                status: exit_status(code),
                stdout: b"7-Zip (scripted)\n".to_vec(),
                stderr: b"ERROR: scripted archiver failure\n".to_vec(),
            });
        }
        let (dest, files) = match args {
            [_, _, _, _, _, dest, files @ ..] => (dest, files),
            _ => return Err(mismatch("7z a with too few arguments")),
        };
        let listing: Vec<String> = files
            .iter()
            .filter_map(|f| Path::new(f).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        fs::write(dest, listing.join("\n"))?;
        Ok(success_output())
    }
}

fn mismatch(message: &str) -> PackError {
    PackError::StubMismatch {
        message: message.to_owned(),
    }
}

impl CommandExecutor for ScriptedExecutor {
    fn run<'a>(&self, cmd: &str, args: &[&'a str]) -> Result<Output> {
        self.calls.borrow_mut().push(
            std::iter::once(cmd)
                .chain(args.iter().copied())
                .map(str::to_owned)
                .collect(),
        );
        match args.first() {
            Some(&"download") => self.pip_download(args),
            Some(&"a") => self.archive(args),
            _ => Err(mismatch(&format!(
                "unexpected invocation: {cmd} {}",
                args.join(" ")
            ))),
        }
    }
}

/// In-memory package index.
#[derive(Debug, Default)]
pub struct StubIndex {
    unreachable: bool,
    releases: HashMap<(String, String), Vec<ReleaseFile>>,
    probes: Cell<u32>,
}

impl StubIndex {
    /// Index publishing the true digests of `files`.
    #[must_use]
    pub fn publishing(files: &[FakeDistribution]) -> Self {
        let mut index = Self::default();
        for file in files {
            index.publish(&file.filename, file.sha256());
        }
        index
    }

    /// Index that never answers.
    #[must_use]
    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Publish `digest` for `filename`, replacing any earlier digest.
    ///
    /// Filenames that do not parse are ignored.
    pub fn publish(&mut self, filename: &str, digest: Sha256Digest) {
        let Ok(artifact) = parse_artifact_filename(Path::new(filename)) else {
            return;
        };
        let files = self
            .releases
            .entry((artifact.name().to_owned(), artifact.version().to_owned()))
            .or_default();
        files.retain(|f| f.filename != filename);
        files.push(ReleaseFile {
            filename: filename.to_owned(),
            sha256: digest,
        });
    }

    /// Number of reachability probes received.
    #[must_use]
    pub fn probes(&self) -> u32 {
        self.probes.get()
    }
}

impl PackageIndex for StubIndex {
    fn is_reachable(&self) -> bool {
        self.probes.set(self.probes.get() + 1);
        !self.unreachable
    }

    fn release_files(
        &self,
        name: &str,
        version: &str,
    ) -> std::result::Result<Option<Vec<ReleaseFile>>, IndexError> {
        Ok(self
            .releases
            .get(&(name.to_owned(), version.to_owned()))
            .cloned())
    }
}

/// In-memory vulnerability database keyed by package name.
#[derive(Debug, Default)]
pub struct StubVulnerabilities {
    advisories: HashMap<String, Vec<Advisory>>,
    failing: bool,
}

impl StubVulnerabilities {
    /// Database with no advisories.
    #[must_use]
    pub fn clean() -> Self {
        Self::default()
    }

    /// Database that fails every query.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Record `advisory` against package `name` (all versions).
    #[must_use]
    pub fn with_advisory(mut self, name: &str, advisory: Advisory) -> Self {
        self.advisories
            .entry(name.to_owned())
            .or_default()
            .push(advisory);
        self
    }
}

impl VulnerabilitySource for StubVulnerabilities {
    fn direct_vulnerabilities(
        &self,
        name: &str,
        _version: &str,
    ) -> std::result::Result<Vec<Advisory>, VulnerabilityError> {
        if self.failing {
            return Err(VulnerabilityError::Http {
                url: "stub://osv/v1/query".to_owned(),
                reason: "scripted failure".to_owned(),
            });
        }
        Ok(self.advisories.get(name).cloned().unwrap_or_default())
    }

    fn advisory(&self, id: &str) -> std::result::Result<AdvisoryDetail, VulnerabilityError> {
        self.advisories
            .values()
            .flatten()
            .find(|a| a.id == id)
            .map(|a| AdvisoryDetail {
                id: a.id.clone(),
                severity: a.severity,
                title: format!("Advisory {id}"),
                versions: "*".to_owned(),
            })
            .ok_or_else(|| VulnerabilityError::Parse {
                url: format!("stub://osv/v1/vulns/{id}"),
                reason: "unknown advisory".to_owned(),
            })
    }
}
