//! Packaging pipeline orchestration.
//!
//! One run downloads a package (or a requirements file) into a fresh
//! workspace, verifies every artifact, writes the ledger and, when every
//! test passed, seals the workspace into an encrypted archive.

use crate::archive::Archiver;
use crate::config::Config;
use crate::dirs::{BaseDirs, output_dir};
use crate::download::{DownloadTarget, Downloader, PipOptions};
use crate::error::{PackError, Result};
use crate::exec::{CommandExecutor, SystemCommandExecutor};
use crate::host::{HostInfo, local_platform};
use crate::index::{PackageIndex, PyPiIndex, probe_reachable};
use crate::ledger::{LOG_TIMESTAMP_FORMAT, Ledger};
use crate::naming::{ArchiveName, matches_package, normalise_name, parse_artifact_filename};
use crate::output::{RunSummary, write_stderr_line};
use crate::verify::{TestDeps, TestRegistry, verify_artifact};
use crate::vulnerability::OsvSource;
use crate::workspace::Workspace;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Characters that start a version constraint in a package specification.
const CONSTRAINT_CHARS: [char; 5] = ['<', '>', '=', '!', '~'];

/// Interpreter, ABI and platform recorded for source-only targets.
const SOURCE_TAGS: (&str, &str, &str) = ("source", "none", "any");

/// A package specification split into name and requested version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Normalised distribution name.
    pub name: String,
    /// Version following the constraint operator, if any.
    pub version: Option<String>,
}

impl PackageSpec {
    /// Split `spec` at its first constraint operator.
    ///
    /// Extras (`name[extra]`) are dropped from the name.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppk::pipeline::PackageSpec;
    ///
    /// let spec = PackageSpec::parse("Django_REST==3.14.0");
    /// assert_eq!(spec.name, "django_rest");
    /// assert_eq!(spec.version.as_deref(), Some("3.14.0"));
    /// assert_eq!(PackageSpec::parse("six").version, None);
    /// ```
    #[must_use]
    pub fn parse(spec: &str) -> Self {
        let (name, constraint) = spec
            .find(CONSTRAINT_CHARS)
            .map_or((spec, ""), |i| spec.split_at(i));
        let name = name.split('[').next().unwrap_or(name).trim();
        let version = constraint
            .trim_matches(|c: char| CONSTRAINT_CHARS.contains(&c) || c.is_whitespace());
        Self {
            name: normalise_name(name),
            version: (!version.is_empty()).then(|| version.to_owned()),
        }
    }
}

/// What the user asked to pack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackRequest {
    /// Package specification, or a requirements file path.
    pub target: String,
    /// Treat `target` as a requirements file.
    pub from_requirements: bool,
    /// Target platform tag passed to pip.
    pub platform: Option<String>,
    /// Target interpreter version passed to pip, e.g. `311`.
    pub python_version: Option<String>,
    /// Use pip's own index configuration.
    pub use_local_index: bool,
    /// Only download built distributions.
    pub only_binary: bool,
    /// Skip dependencies.
    pub no_deps: bool,
    /// Package names to drop before verification.
    pub exclude: Vec<String>,
    /// Keep the workspace after a passing run.
    pub no_cleanup: bool,
}

/// How a run ended, short of a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackOutcome {
    /// Every artifact passed and the archive was written.
    Passed {
        /// Destination archive.
        archive: Utf8PathBuf,
        /// Workspace kept because of `no_cleanup`.
        workspace: Option<PathBuf>,
    },
    /// At least one test failed; the workspace was kept.
    Failed {
        /// Preserved workspace holding the downloads and the log.
        workspace: PathBuf,
    },
    /// pip could not download the target.
    DownloadFailed,
    /// pip succeeded but no recognisable artifact of the target package
    /// was found.
    TargetNotFound,
}

impl PackOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Passed { .. } => 0,
            Self::Failed { .. } | Self::DownloadFailed | Self::TargetNotFound => 1,
        }
    }
}

/// Program names and locations used by a run.
#[derive(Debug, Clone, Copy)]
pub struct PackSettings<'a> {
    /// Index base URL, for diagnostics.
    pub index_url: &'a str,
    /// Simple index URL handed to pip.
    pub simple_index_url: &'a str,
    /// pip program.
    pub pip: &'a str,
    /// Archiver program.
    pub archiver: &'a str,
    /// Directory receiving the archive.
    pub output_dir: &'a Utf8Path,
    /// Parent of the workspace; the system temp dir when `None`.
    pub workspace_root: Option<&'a Path>,
}

/// Collaborators for one run.
pub struct PackContext<'a> {
    /// Runs pip and the archiver.
    pub executor: &'a dyn CommandExecutor,
    /// Package index probed for reachability.
    pub index: &'a dyn PackageIndex,
    /// Configured verification tests.
    pub registry: &'a TestRegistry<'a>,
    /// Host and user recorded in the ledger.
    pub host: &'a HostInfo,
    /// Run start time.
    pub now: DateTime<Local>,
    /// Program names and locations.
    pub settings: PackSettings<'a>,
}

/// Pack with production collaborators built from `config`.
///
/// # Errors
///
/// Returns [`PackError`] for configuration faults and for any fatal fault
/// raised by [`pack_with`].
pub fn pack(
    request: &PackRequest,
    config: &Config,
    dirs: &dyn BaseDirs,
    out: &mut dyn Write,
) -> Result<PackOutcome> {
    let index = PyPiIndex::new(&config.index.url, config.index.timeout());
    let osv = OsvSource::new(&config.vulnerability.url, config.vulnerability.timeout());
    let registry = TestRegistry::from_names(
        &config.verification.tests,
        TestDeps {
            index: &index,
            vulnerabilities: &osv,
            verbose: config.verification.verbose,
        },
    )?;
    let executor = SystemCommandExecutor::with_timeout(config.tools.timeout());
    let output = output_dir(dirs, config.paths.output_dir.as_deref())?;
    let host = HostInfo::detect();
    let context = PackContext {
        executor: &executor,
        index: &index,
        registry: &registry,
        host: &host,
        now: Local::now(),
        settings: PackSettings {
            index_url: &config.index.url,
            simple_index_url: &config.index.simple_url,
            pip: &config.tools.pip,
            archiver: &config.tools.archiver,
            output_dir: &output,
            workspace_root: config.paths.workspace_root.as_deref().map(Utf8Path::as_std_path),
        },
    };
    pack_with(request, &context, out)
}

/// Run the packaging pipeline with injected collaborators.
///
/// # Errors
///
/// Returns [`PackError`] for environment faults: an unreachable index,
/// a tool that cannot be launched, a failed archiver or I/O errors. The
/// workspace is removed on this path.
pub fn pack_with(
    request: &PackRequest,
    context: &PackContext<'_>,
    out: &mut dyn Write,
) -> Result<PackOutcome> {
    let settings = &context.settings;
    if !probe_reachable(context.index) {
        return Err(PackError::IndexUnreachable {
            url: settings.index_url.to_owned(),
        });
    }

    let spec = (!request.from_requirements).then(|| PackageSpec::parse(&request.target));
    let workspace = Workspace::create(settings.workspace_root)?;
    write_stderr_line(out, format!("Downloading {} ...", request.target));

    let target = match &spec {
        Some(_) => DownloadTarget::Package(&request.target),
        None => DownloadTarget::Requirements(Path::new(&request.target)),
    };
    let options = PipOptions {
        index_url: (!request.use_local_index).then_some(settings.simple_index_url),
        platform: request.platform.as_deref(),
        python_version: request.python_version.as_deref(),
        only_binary: request.only_binary,
        no_deps: request.no_deps,
    };
    let report = Downloader::new(context.executor, settings.pip).download(
        workspace.path(),
        target,
        &options,
        out,
    )?;
    if !report.succeeded {
        workspace.remove()?;
        return Ok(PackOutcome::DownloadFailed);
    }

    let archive_name = match &spec {
        Some(spec) => {
            let Some(name) = package_archive_name(&workspace, spec, request, out)? else {
                workspace.remove()?;
                return Ok(PackOutcome::TargetNotFound);
            };
            name
        }
        None => {
            let platform = request.platform.clone().unwrap_or_else(local_platform);
            ArchiveName::requirements(
                &context.now,
                &context.host.username,
                &platform,
                request.python_version.as_deref(),
            )
        }
    };
    let stem = archive_name.stem();
    log::info!("archive stem {stem}");

    for removed in workspace.exclude(&request.exclude)? {
        write_stderr_line(out, format!("Excluded {removed}"));
    }

    let artifacts = workspace.files()?;
    let results = artifacts
        .iter()
        .map(|path| verify_artifact(path, context.registry, out))
        .collect::<Result<Vec<_>>>()?;

    let ledger = Ledger::new(
        context.registry.columns(),
        context.host,
        context.now.format(LOG_TIMESTAMP_FORMAT).to_string(),
    );
    let (outcome, ledger_files) = ledger.write(workspace.path(), &stem, &results)?;

    let mut archived = artifacts;
    archived.push(ledger_files.log);
    archived.push(ledger_files.key);
    if spec.is_none() {
        let effective = report
            .amended_requirements
            .as_ref()
            .map_or_else(|| Path::new(&request.target), |f| f.path());
        let copy = workspace.path().join(format!("{stem}.txt"));
        fs::copy(effective, &copy)?;
        archived.push(copy);
    }

    if !outcome.passed() {
        let kept = workspace.keep();
        write_stderr_line(
            out,
            RunSummary {
                target: &request.target,
                passed: false,
                archive: None,
                workspace: Some(&kept),
            },
        );
        return Ok(PackOutcome::Failed { workspace: kept });
    }

    let archive_file = archive_name.archive_filename();
    let dest = settings.output_dir.join(&archive_file.filename);
    write_stderr_line(out, format!("Archiving to {dest} ..."));
    Archiver::new(context.executor, settings.archiver).create(
        dest.as_std_path(),
        &archive_file.key,
        &archived,
    )?;

    let kept = if request.no_cleanup {
        Some(workspace.keep())
    } else {
        workspace.remove()?;
        None
    };
    write_stderr_line(
        out,
        RunSummary {
            target: &request.target,
            passed: true,
            archive: Some(&dest),
            workspace: kept.as_deref(),
        },
    );
    Ok(PackOutcome::Passed {
        archive: dest,
        workspace: kept,
    })
}

/// Archive name derived from the downloaded target artifact.
///
/// `None`, reported to `out`, when no artifact of the target package was
/// downloaded or none of its files has a recognised distribution format.
fn package_archive_name(
    workspace: &Workspace,
    spec: &PackageSpec,
    request: &PackRequest,
    out: &mut dyn Write,
) -> Result<Option<ArchiveName>> {
    let files = workspace.files()?;
    let candidates = files.iter().filter(|path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| matches_package(n, &spec.name))
    });
    let mut artifact = None;
    let mut first_error = None;
    for path in candidates {
        match parse_artifact_filename(path) {
            Ok(parsed) => {
                artifact = Some(parsed);
                break;
            }
            Err(e) if first_error.is_none() => first_error = Some(e),
            Err(_) => {}
        }
    }
    let Some(artifact) = artifact else {
        let message = match first_error {
            Some(e) => format!("Cannot derive an archive name for {}: {e}", spec.name),
            None => format!("No downloaded file belongs to {}.", spec.name),
        };
        write_stderr_line(out, message);
        return Ok(None);
    };
    if let Some(requested) = spec.version.as_deref().filter(|v| *v != artifact.version()) {
        log::warn!(
            "requested {} {requested} but downloaded {}",
            spec.name,
            artifact.version()
        );
    }
    let (interpreter, abi, platform) = artifact.tags().map_or(SOURCE_TAGS, |tags| {
        (
            tags.interpreter.as_str(),
            tags.abi.as_str(),
            tags.platform.as_str(),
        )
    });
    Ok(Some(ArchiveName::package(
        &spec.name,
        artifact.version(),
        interpreter,
        abi,
        platform,
        request.python_version.as_deref(),
    )))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
