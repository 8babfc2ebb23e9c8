//! Hand-off to the external unpack binary and the mirror refresh program.
//!
//! ppk does not verify or extract archives itself. The unpack binary owns
//! that decision; this module forwards the archive path and reports the exit
//! code.

use crate::error::{PackError, Result, error_chain};
use crate::exec::{CommandExecutor, exit_code};
use crate::output::write_stderr_line;
use std::env;
use std::ffi::{OsStr, OsString};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Unpack program used when none is configured.
pub const DEFAULT_UNPACK_PROGRAM: &str = "upack";

/// Runs the unpack binary and, afterwards, the refresh program.
pub struct Unpacker<'a> {
    executor: &'a dyn CommandExecutor,
    unpack_program: &'a str,
    refresh_program: &'a str,
    search_path: Option<OsString>,
}

impl<'a> Unpacker<'a> {
    /// Unpacker searching the process `PATH` for the refresh program.
    #[must_use]
    pub fn new(
        executor: &'a dyn CommandExecutor,
        unpack_program: &'a str,
        refresh_program: &'a str,
    ) -> Self {
        Self {
            executor,
            unpack_program,
            refresh_program,
            search_path: env::var_os("PATH"),
        }
    }

    /// Replace the directories searched for the refresh program.
    #[must_use]
    pub fn with_search_path(mut self, search_path: Option<OsString>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Run the unpack binary on `archive` and return its exit code.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::CommandFailed`] if the binary cannot be launched
    /// and [`PackError::NonUtf8Path`] for an archive path that is not UTF-8.
    pub fn run(&self, archive: &Path, out: &mut dyn Write) -> Result<i32> {
        let archive_arg = archive.to_str().ok_or_else(|| PackError::NonUtf8Path {
            path: archive.display().to_string(),
        })?;
        let name = archive
            .file_name()
            .map_or_else(|| archive_arg.into(), |n| n.to_string_lossy());
        write_stderr_line(out, format!("Verifying and unpacking: {name} ..."));

        let output = self.executor.run(self.unpack_program, &[archive_arg])?;
        let code = exit_code(output.status);
        if code != 0 {
            write_stderr_line(out, String::from_utf8_lossy(&output.stderr).trim_end());
        }
        log::info!("{} exited with {code}", self.unpack_program);
        Ok(code)
    }

    /// Run the refresh program and return its exit code.
    ///
    /// A missing program or a failed launch is reported to `out` and
    /// returns `1`.
    pub fn refresh(&self, out: &mut dyn Write) -> i32 {
        let Some(program) = find_program(self.refresh_program, self.search_path.as_deref()) else {
            log::warn!("refresh program {} not found", self.refresh_program);
            write_stderr_line(
                out,
                format!(
                    "The pip refresh program could not be found: {}\n\
                     The libraries have been unpacked, but the repo has *not* been refreshed.",
                    self.refresh_program
                ),
            );
            return 1;
        };

        let program = program.to_string_lossy();
        match self.executor.run(&program, &[]) {
            Ok(output) => {
                let code = exit_code(output.status);
                if code != 0 {
                    write_stderr_line(out, String::from_utf8_lossy(&output.stderr).trim_end());
                }
                code
            }
            Err(e) => {
                write_stderr_line(out, "An error occurred while calling pip refresh.");
                write_stderr_line(out, error_chain(&e));
                1
            }
        }
    }
}

/// Locate `program` on `search_path`.
///
/// A name containing a path separator is used as given when it exists.
///
/// # Examples
///
/// ```
/// use ppk::unpack::find_program;
/// use std::ffi::OsStr;
///
/// assert_eq!(find_program("ppk-no-such-program", Some(OsStr::new(""))), None);
/// ```
#[must_use]
pub fn find_program(program: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    if program.is_empty() {
        return None;
    }
    let as_path = Path::new(program);
    if as_path.components().count() > 1 {
        return as_path.is_file().then(|| as_path.to_path_buf());
    }
    env::split_paths(search_path?)
        .flat_map(|dir| candidates(&dir, program))
        .find(|candidate| candidate.is_file())
}

#[cfg(windows)]
fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    vec![dir.join(program), dir.join(format!("{program}.exe"))]
}

#[cfg(not(windows))]
fn candidates(dir: &Path, program: &str) -> Vec<PathBuf> {
    vec![dir.join(program)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockCommandExecutor;
    use crate::test_utils::{exit_status, success_output};
    use rstest::{fixture, rstest};
    use std::fs;
    use std::process::Output;
    use tempfile::TempDir;

    const REFRESH: &str = "pip-refresh";

    struct Bin {
        dir: TempDir,
    }

    impl Bin {
        fn path_var(&self) -> Option<OsString> {
            Some(self.dir.path().as_os_str().to_owned())
        }

        fn program(&self) -> String {
            self.dir.path().join(REFRESH).to_string_lossy().into_owned()
        }
    }

    #[fixture]
    fn bin() -> Bin {
        let dir = tempfile::tempdir().expect("bin dir");
        fs::write(dir.path().join(REFRESH), b"#!/bin/sh\n").expect("write program");
        Bin { dir }
    }

    fn failed(code: i32, stderr: &str) -> Output {
        Output {
            status: exit_status(code),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[rstest]
    fn run_forwards_archive_and_exit_code() {
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|cmd, args| cmd == "upack" && args == ["/in/six-1.16.0-py2.py3-none-any.7z"])
            .times(1)
            .returning(|_, _| Ok(failed(3, "signature check failed\n")));
        let mut out = Vec::new();

        let code = Unpacker::new(&executor, "upack", REFRESH)
            .run(Path::new("/in/six-1.16.0-py2.py3-none-any.7z"), &mut out)
            .expect("unpacker launched");

        assert_eq!(code, 3);
        let text = String::from_utf8(out).expect("UTF-8");
        assert!(text.contains("Verifying and unpacking: six-1.16.0-py2.py3-none-any.7z ..."));
        assert!(text.contains("signature check failed"));
    }

    #[rstest]
    fn run_launch_failure_is_fatal() {
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().returning(|cmd, _| {
            Err(PackError::CommandFailed {
                program: cmd.to_owned(),
                reason: "No such file or directory".to_owned(),
            })
        });

        let result = Unpacker::new(&executor, "upack", REFRESH)
            .run(Path::new("/in/a.7z"), &mut Vec::new());

        assert!(matches!(result, Err(PackError::CommandFailed { .. })));
    }

    #[rstest]
    fn refresh_runs_program_found_on_path(bin: Bin) {
        let expected = bin.program();
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(move |cmd, args| cmd == expected && args.is_empty())
            .times(1)
            .returning(|_, _| Ok(success_output()));

        let code = Unpacker::new(&executor, "upack", REFRESH)
            .with_search_path(bin.path_var())
            .refresh(&mut Vec::new());

        assert_eq!(code, 0);
    }

    #[rstest]
    fn refresh_accepts_explicit_path(bin: Bin) {
        let program = bin.program();
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .times(1)
            .returning(|_, _| Ok(failed(4, "mirror offline")));

        let mut out = Vec::new();
        let code = Unpacker::new(&executor, "upack", &program)
            .with_search_path(None)
            .refresh(&mut out);

        assert_eq!(code, 4);
        assert!(String::from_utf8(out).expect("UTF-8").contains("mirror offline"));
    }

    #[rstest]
    fn missing_refresh_program_warns() {
        let empty = tempfile::tempdir().expect("empty dir");
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();
        let mut out = Vec::new();

        let code = Unpacker::new(&executor, "upack", REFRESH)
            .with_search_path(Some(empty.path().as_os_str().to_owned()))
            .refresh(&mut out);

        assert_eq!(code, 1);
        let text = String::from_utf8(out).expect("UTF-8");
        assert!(text.contains("could not be found: pip-refresh"));
        assert!(text.contains("*not* been refreshed"));
    }

    #[rstest]
    fn refresh_error_prints_chain_and_returns_one(bin: Bin) {
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().returning(|cmd, _| {
            Err(PackError::CommandFailed {
                program: cmd.to_owned(),
                reason: "timed out after 1800 seconds".to_owned(),
            })
        });
        let mut out = Vec::new();

        let code = Unpacker::new(&executor, "upack", REFRESH)
            .with_search_path(bin.path_var())
            .refresh(&mut out);

        assert_eq!(code, 1);
        let text = String::from_utf8(out).expect("UTF-8");
        assert!(text.contains("An error occurred while calling pip refresh."));
        assert!(text.contains("timed out after 1800 seconds"));
    }

    #[rstest]
    #[case::empty_name("")]
    #[case::missing_path("/nonexistent/ppk/pip-refresh")]
    fn unusable_program_names_are_not_found(#[case] program: &str) {
        assert_eq!(find_program(program, None), None);
    }
}
