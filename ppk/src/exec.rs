//! External command execution.
//!
//! Every subprocess ppk starts (`pip`, `7z`, the unpack binary and the
//! mirror refresh program) goes through [`CommandExecutor`], so the
//! pipeline can be driven by a scripted executor in tests.

use crate::error::{PackError, Result};
use std::io::Read;
use std::process::{Command, ExitStatus, Output, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

/// Default upper bound on the runtime of a single external command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(1800);

/// Abstraction for running external commands.
#[cfg_attr(test, mockall::automock)]
pub trait CommandExecutor {
    /// Runs a command with arguments and returns the captured output.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::CommandFailed`] if the command cannot be spawned
    /// or does not finish within the executor's timeout.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use ppk::exec::{CommandExecutor, SystemCommandExecutor};
    ///
    /// let executor = SystemCommandExecutor::default();
    /// let output = executor.run("pip", &["--version"])?;
    /// assert!(output.status.success());
    /// # Ok::<(), ppk::error::PackError>(())
    /// ```
    fn run<'a>(&self, cmd: &str, args: &[&'a str]) -> Result<Output>;
}

/// Executes commands on the host system with a bounded wait.
#[derive(Debug, Clone, Copy)]
pub struct SystemCommandExecutor {
    timeout: Duration,
}

impl SystemCommandExecutor {
    /// Create an executor that kills commands running longer than `timeout`.
    #[must_use]
    pub const fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandExecutor {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandExecutor for SystemCommandExecutor {
    fn run<'a>(&self, cmd: &str, args: &[&'a str]) -> Result<Output> {
        log::debug!("running {cmd} {}", args.join(" "));
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| command_failed(cmd, e.to_string()))?;

        // Drain both pipes while waiting so a chatty child cannot fill a
        // pipe buffer and block forever.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child
            .wait_timeout(self.timeout)
            .map_err(|e| command_failed(cmd, e.to_string()))?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(command_failed(
                    cmd,
                    format!("timed out after {} seconds", self.timeout.as_secs()),
                ));
            }
        };

        Ok(Output {
            status,
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        })
    }
}

/// Exit code of a finished process; signals map to `1`.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        std::thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = reader.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn join_drain(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn command_failed(program: &str, reason: String) -> PackError {
    PackError::CommandFailed {
        program: program.to_owned(),
        reason,
    }
}
