//! Unit tests for the packaging pipeline.
//!
//! The pipeline runs against a scripted pip/7z executor and in-memory index
//! and vulnerability stubs, inside scratch directories.

use super::*;
use crate::digest::Sha256Digest;
use crate::test_utils::{
    FakeDistribution, PipStep, ScriptedExecutor, StubIndex, StubVulnerabilities,
};
use crate::verify::TestDeps;
use crate::vulnerability::{Advisory, Severity};
use chrono::TimeZone;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const PREQS_WHEEL: &str = "preqs-0.1.0-py3-none-any.whl";
const SIX_WHEEL: &str = "six-1.16.0-py2.py3-none-any.whl";
const PACKAGING_WHEEL: &str = "packaging-23.2-py3-none-any.whl";

struct Harness {
    workspace_root: TempDir,
    output: TempDir,
    host: HostInfo,
    now: DateTime<Local>,
}

impl Harness {
    fn output_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(self.output.path().to_path_buf()).expect("UTF-8 temp dir")
    }

    fn workspaces(&self) -> Vec<PathBuf> {
        fs::read_dir(self.workspace_root.path())
            .expect("list workspace root")
            .map(|e| e.expect("entry").path())
            .collect()
    }

    fn run(
        &self,
        request: &PackRequest,
        executor: &ScriptedExecutor,
        index: &StubIndex,
        vulnerabilities: &StubVulnerabilities,
    ) -> (Result<PackOutcome>, String) {
        let registry = TestRegistry::from_names(
            &["checksum", "vulnerability"],
            TestDeps {
                index,
                vulnerabilities,
                verbose: true,
            },
        )
        .expect("known tests");
        let output_dir = self.output_dir();
        let context = PackContext {
            executor,
            index,
            registry: &registry,
            host: &self.host,
            now: self.now,
            settings: PackSettings {
                index_url: "https://pypi.org",
                simple_index_url: "https://pypi.org/simple/",
                pip: "pip",
                archiver: "7z",
                output_dir: &output_dir,
                workspace_root: Some(self.workspace_root.path()),
            },
        };
        let mut out = Vec::new();
        let result = pack_with(request, &context, &mut out);
        (result, String::from_utf8(out).expect("UTF-8 output"))
    }
}

#[fixture]
fn harness() -> Harness {
    Harness {
        workspace_root: tempfile::tempdir().expect("workspace root"),
        output: tempfile::tempdir().expect("output dir"),
        host: HostInfo::new("build01", "jo-smith"),
        now: Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .expect("unambiguous local time"),
    }
}

fn package_request(target: &str) -> PackRequest {
    PackRequest {
        target: target.to_owned(),
        ..PackRequest::default()
    }
}

fn distributions(names: &[&str]) -> Vec<FakeDistribution> {
    names.iter().map(|n| FakeDistribution::new(n)).collect()
}

fn read_log(workspace: &Path) -> String {
    let log = fs::read_dir(workspace)
        .expect("list workspace")
        .map(|e| e.expect("entry").path())
        .find(|p| p.to_string_lossy().ends_with("__verification.log"))
        .expect("log written");
    fs::read_to_string(log).expect("read log")
}

#[rstest]
#[case::plain("preqs", "preqs", None)]
#[case::pinned("preqs==0.1.0", "preqs", Some("0.1.0"))]
#[case::compatible("Typing-Extensions ~= 4.8", "typing_extensions", Some("4.8"))]
#[case::upper_bound("numpy<2", "numpy", Some("2"))]
#[case::extras("requests[socks]>=2.31", "requests", Some("2.31"))]
#[case::exclusion("six!=1.15.0", "six", Some("1.15.0"))]
fn package_spec_splits_at_first_operator(
    #[case] input: &str,
    #[case] name: &str,
    #[case] version: Option<&str>,
) {
    let spec = PackageSpec::parse(input);
    assert_eq!(spec.name, name);
    assert_eq!(spec.version.as_deref(), version);
}

#[rstest]
#[case::passed(PackOutcome::Passed { archive: Utf8PathBuf::from("/out/a.7z"), workspace: None }, 0)]
#[case::failed(PackOutcome::Failed { workspace: PathBuf::from("/tmp/ppk-x") }, 1)]
#[case::download_failed(PackOutcome::DownloadFailed, 1)]
#[case::target_not_found(PackOutcome::TargetNotFound, 1)]
fn outcome_exit_codes(#[case] outcome: PackOutcome, #[case] code: i32) {
    assert_eq!(outcome.exit_code(), code);
}

#[rstest]
fn single_package_run_archives_and_cleans_up(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    let index = StubIndex::publishing(&files);

    let (result, output) = harness.run(
        &package_request("preqs"),
        &executor,
        &index,
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    let expected = harness.output_dir().join("preqs-0.1.0-py3-none-any.7z");
    assert_eq!(
        outcome,
        PackOutcome::Passed {
            archive: expected.clone(),
            workspace: None
        }
    );
    assert!(expected.is_file());
    assert!(harness.workspaces().is_empty());
    assert!(output.contains("The preqs package has: PASSED"));

    let archive_calls = executor.calls_for("a");
    assert_eq!(archive_calls.len(), 1);
    let key = Sha256Digest::of_bytes(b"preqs-0.1.0-py3-none-any.7z");
    assert!(archive_calls[0].contains(&format!("-p{key}")));

    let listing = fs::read_to_string(&expected).expect("read archive listing");
    assert_eq!(
        listing.lines().collect::<Vec<_>>(),
        [
            PREQS_WHEEL,
            "preqs-0.1.0-py3-none-any__verification.log",
            "preqs-0.1.0-py3-none-any__verification.key",
        ]
    );
}

#[rstest]
fn pip_receives_index_and_target(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    let request = PackRequest {
        python_version: Some("311".to_owned()),
        ..package_request("preqs==0.1.0")
    };

    let (result, _) = harness.run(
        &request,
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    let PackOutcome::Passed { archive, .. } = outcome else {
        panic!("expected pass, got {outcome:?}");
    };
    assert_eq!(archive.file_name(), Some("preqs-0.1.0-py3-none-any-311.7z"));
    let pip = &executor.calls_for("download")[0];
    assert_eq!(pip[0], "pip");
    assert!(pip.contains(&"preqs==0.1.0".to_owned()));
    assert!(pip.windows(2).any(|w| w == ["-i", "https://pypi.org/simple/"]));
    assert!(pip.windows(2).any(|w| w == ["--python-version", "311"]));
}

#[rstest]
fn local_index_omits_index_flag(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    let request = PackRequest {
        use_local_index: true,
        ..package_request("preqs")
    };

    let (result, _) = harness.run(
        &request,
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    result.expect("run completes");
    assert!(!executor.calls_for("download")[0].contains(&"-i".to_owned()));
}

#[rstest]
fn source_distribution_target_uses_source_tags(harness: Harness) {
    let files = distributions(&["PyYAML-6.0.1.tar.gz"]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);

    let (result, _) = harness.run(
        &package_request("pyyaml"),
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    let PackOutcome::Passed { archive, .. } = outcome else {
        panic!("expected pass, got {outcome:?}");
    };
    assert_eq!(archive.file_name(), Some("pyyaml-6.0.1-source-none-any.7z"));
}

#[rstest]
fn requirements_run_excludes_packages_and_captures_file(harness: Harness) {
    let scratch = tempfile::tempdir().expect("scratch");
    let requirements = scratch.path().join("reqs.txt");
    fs::write(&requirements, "six\npackaging\n").expect("write requirements");

    let files = distributions(&[SIX_WHEEL, PACKAGING_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    let request = PackRequest {
        from_requirements: true,
        platform: Some("win_amd64".to_owned()),
        exclude: vec!["packaging".to_owned()],
        no_cleanup: true,
        ..package_request(&requirements.to_string_lossy())
    };

    let (result, output) = harness.run(
        &request,
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    let PackOutcome::Passed {
        archive,
        workspace: Some(workspace),
    } = outcome
    else {
        panic!("expected pass with kept workspace, got {outcome:?}");
    };
    let stem = "req-0.0.0-20240309140507-jo_smith-win_amd64";
    assert_eq!(archive.file_name(), Some(format!("{stem}.7z").as_str()));
    assert!(output.contains(&format!("Excluded {PACKAGING_WHEEL}")));

    let log = read_log(&workspace);
    assert!(log.contains(SIX_WHEEL));
    assert!(!log.contains("packaging"));
    assert!(log.ends_with("Result: PASS\n"));

    let captured = fs::read_to_string(workspace.join(format!("{stem}.txt")))
        .expect("requirements captured");
    assert_eq!(captured, "six\npackaging\n");

    let listing = fs::read_to_string(&archive).expect("read archive listing");
    assert!(listing.lines().all(|l| !l.starts_with("packaging")));
    assert!(listing.lines().any(|l| l == format!("{stem}.txt")));
    fs::remove_dir_all(workspace).expect("clean up kept workspace");
}

#[rstest]
fn missing_distribution_is_retried_once_with_source_build(harness: Harness) {
    let scratch = tempfile::tempdir().expect("scratch");
    let requirements = scratch.path().join("reqs.txt");
    fs::write(&requirements, "six\nfoo-bar==9\n").expect("write requirements");
    let files = distributions(&[SIX_WHEEL, "foo_bar-9.tar.gz"]);
    let executor = ScriptedExecutor::new(vec![
        PipStep::Fail("ERROR: No matching distribution found for foo-bar==9\n".to_owned()),
        PipStep::Download(files.clone()),
    ]);
    let request = PackRequest {
        from_requirements: true,
        platform: Some("linux_x86_64".to_owned()),
        no_cleanup: true,
        ..package_request(&requirements.to_string_lossy())
    };

    let (result, output) = harness.run(
        &request,
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    let PackOutcome::Passed {
        workspace: Some(workspace),
        ..
    } = outcome
    else {
        panic!("expected pass with kept workspace, got {outcome:?}");
    };
    assert!(output.contains("trying again for foo-bar ..."));
    let pip_calls = executor.calls_for("download");
    assert_eq!(pip_calls.len(), 2);
    assert!(!pip_calls[1].contains(&requirements.to_string_lossy().into_owned()));

    let captured = fs::read_to_string(
        workspace.join("req-0.0.0-20240309140507-jo_smith-linux_x86_64.txt"),
    )
    .expect("requirements captured");
    assert!(captured.ends_with("--no-binary=foo-bar\n"));
    assert_eq!(
        fs::read_to_string(&requirements).expect("original untouched"),
        "six\nfoo-bar==9\n"
    );
    fs::remove_dir_all(workspace).expect("clean up kept workspace");
}

#[rstest]
fn checksum_mismatch_fails_and_keeps_workspace(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    let mut index = StubIndex::publishing(&files);
    index.publish(PREQS_WHEEL, Sha256Digest::of_bytes(b"tampered"));

    let (result, output) = harness.run(
        &package_request("preqs"),
        &executor,
        &index,
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    let PackOutcome::Failed { workspace } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(workspace.is_dir());
    assert!(read_log(&workspace).contains(&format!("{PREQS_WHEEL},false,")));
    assert!(output.contains("checksum mismatch"));
    assert!(output.contains("Please check the log file"));
    assert!(executor.calls_for("a").is_empty());
    assert!(fs::read_dir(harness.output.path()).expect("list").next().is_none());
    fs::remove_dir_all(workspace).expect("clean up kept workspace");
}

#[rstest]
fn high_severity_advisory_fails_run(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    let vulnerabilities = StubVulnerabilities::clean().with_advisory(
        "preqs",
        Advisory {
            id: "GHSA-xxxx".to_owned(),
            aliases: Vec::new(),
            severity: Some(Severity::High),
        },
    );

    let (result, output) = harness.run(
        &package_request("preqs"),
        &executor,
        &StubIndex::publishing(&files),
        &vulnerabilities,
    );

    let outcome = result.expect("run completes");
    let PackOutcome::Failed { workspace } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(read_log(&workspace).contains(&format!("{PREQS_WHEEL},true,false,0,1,0,0,fail")));
    assert!(output.contains("Advisory GHSA-xxxx"));
    fs::remove_dir_all(workspace).expect("clean up kept workspace");
}

#[rstest]
fn repeated_runs_overwrite_archive(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let index = StubIndex::publishing(&files);
    let dest = harness.output_dir().join("preqs-0.1.0-py3-none-any.7z");
    fs::write(&dest, "stale").expect("write stale archive");

    for _ in 0..2 {
        let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
        let (result, _) = harness.run(
            &package_request("preqs"),
            &executor,
            &index,
            &StubVulnerabilities::clean(),
        );
        assert_eq!(result.expect("run completes").exit_code(), 0);
    }

    let listing = fs::read_to_string(&dest).expect("read archive");
    assert!(listing.starts_with(PREQS_WHEEL));
    assert_eq!(
        fs::read_dir(harness.output.path()).expect("list").count(),
        1
    );
}

#[rstest]
fn unreachable_index_is_fatal_before_download(harness: Harness) {
    let executor = ScriptedExecutor::default();
    let index = StubIndex::unreachable();

    let (result, _) = harness.run(
        &package_request("preqs"),
        &executor,
        &index,
        &StubVulnerabilities::clean(),
    );

    assert!(matches!(result, Err(PackError::IndexUnreachable { .. })));
    assert_eq!(index.probes(), 3);
    assert!(executor.calls().is_empty());
    assert!(harness.workspaces().is_empty());
}

#[rstest]
fn pip_failure_removes_workspace(harness: Harness) {
    let executor = ScriptedExecutor::new(vec![PipStep::Fail(
        "ERROR: Could not install packages due to an OSError\n".to_owned(),
    )]);

    let (result, output) = harness.run(
        &package_request("preqs"),
        &executor,
        &StubIndex::default(),
        &StubVulnerabilities::clean(),
    );

    assert_eq!(result.expect("run completes"), PackOutcome::DownloadFailed);
    assert!(output.contains("An error was thrown from pip."));
    assert_eq!(executor.calls_for("download").len(), 1);
    assert!(harness.workspaces().is_empty());
}

#[rstest]
fn missing_target_artifact_is_reported(harness: Harness) {
    let files = distributions(&[SIX_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);

    let (result, output) = harness.run(
        &package_request("preqs"),
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    assert_eq!(result.expect("run completes"), PackOutcome::TargetNotFound);
    assert!(output.contains("No downloaded file belongs to preqs."));
    assert!(harness.workspaces().is_empty());
}

#[rstest]
fn unrecognised_target_format_is_a_failed_run(harness: Harness) {
    let files = distributions(&["preqs-0.1.0.tar.bz2"]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);

    let (result, output) = harness.run(
        &package_request("preqs"),
        &executor,
        &StubIndex::default(),
        &StubVulnerabilities::clean(),
    );

    let outcome = result.expect("run completes");
    assert_eq!(outcome, PackOutcome::TargetNotFound);
    assert_eq!(outcome.exit_code(), 1);
    assert!(output.contains("Cannot derive an archive name for preqs"));
    assert!(output.contains("preqs-0.1.0.tar.bz2"));
    assert!(executor.calls_for("a").is_empty());
    assert!(harness.workspaces().is_empty());
}

#[rstest]
fn archiver_failure_is_fatal_and_removes_workspace(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);
    executor.set_archiver_exit(2);

    let (result, _) = harness.run(
        &package_request("preqs"),
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::clean(),
    );

    match result {
        Err(PackError::Archive { code, output }) => {
            assert_eq!(code, 2);
            assert!(output.contains("scripted archiver failure"));
        }
        other => panic!("expected archive error, got {other:?}"),
    }
    assert!(harness.workspaces().is_empty());
}

#[rstest]
fn vulnerability_source_outage_is_fatal(harness: Harness) {
    let files = distributions(&[PREQS_WHEEL]);
    let executor = ScriptedExecutor::new(vec![PipStep::Download(files.clone())]);

    let (result, _) = harness.run(
        &package_request("preqs"),
        &executor,
        &StubIndex::publishing(&files),
        &StubVulnerabilities::failing(),
    );

    assert!(matches!(result, Err(PackError::Vulnerability(_))));
    assert!(executor.calls_for("a").is_empty());
    assert!(harness.workspaces().is_empty());
}
