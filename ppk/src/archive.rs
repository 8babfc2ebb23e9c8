//! Encrypted archive creation with `7z`.
//!
//! Archives use header encryption so even the file list needs the password.

use crate::digest::Sha256Digest;
use crate::error::{PackError, Result};
use crate::exec::{CommandExecutor, exit_code};
use std::fs;
use std::path::{Path, PathBuf};

/// Builds the encrypted output archive.
pub struct Archiver<'a> {
    executor: &'a dyn CommandExecutor,
    program: &'a str,
}

/// Arguments for `7z a` with fast compression and header encryption.
///
/// # Examples
///
/// ```
/// use ppk::archive::archive_args;
/// use ppk::digest::Sha256Digest;
/// use std::path::PathBuf;
///
/// let key = Sha256Digest::of_bytes(b"six.7z");
/// let args = archive_args("/out/six.7z", &key, &[PathBuf::from("/ws/six.whl")]);
/// assert_eq!(args[..4], ["a", "-mx3", "-mhe=on", "-mmt=on"]);
/// assert_eq!(args[4], format!("-p{key}"));
/// assert_eq!(args[5..], ["/out/six.7z", "/ws/six.whl"]);
/// ```
#[must_use]
pub fn archive_args(dest: &str, key: &Sha256Digest, files: &[PathBuf]) -> Vec<String> {
    let mut args = vec![
        "a".to_owned(),
        "-mx3".to_owned(),
        "-mhe=on".to_owned(),
        "-mmt=on".to_owned(),
        format!("-p{key}"),
        dest.to_owned(),
    ];
    args.extend(files.iter().map(|f| f.to_string_lossy().into_owned()));
    args
}

impl<'a> Archiver<'a> {
    /// Archiver invoking `program` through `executor`.
    #[must_use]
    pub fn new(executor: &'a dyn CommandExecutor, program: &'a str) -> Self {
        Self { executor, program }
    }

    /// Write `files` into a new archive at `dest`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns [`PackError::Archive`] with the archiver's output when it
    /// exits non-zero, [`PackError::CommandFailed`] if it cannot be
    /// launched, and [`PackError::Io`] if the old archive cannot be removed.
    pub fn create(&self, dest: &Path, key: &Sha256Digest, files: &[PathBuf]) -> Result<()> {
        if dest.exists() {
            log::info!("replacing existing archive {}", dest.display());
            fs::remove_file(dest)?;
        }
        let dest_arg = dest.to_str().ok_or_else(|| PackError::NonUtf8Path {
            path: dest.display().to_string(),
        })?;
        let args = archive_args(dest_arg, key, files);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.executor.run(self.program, &arg_refs)?;
        if output.status.success() {
            return Ok(());
        }
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(PackError::Archive {
            code: exit_code(output.status),
            output: text,
        })
    }
}
