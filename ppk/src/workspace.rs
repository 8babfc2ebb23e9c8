//! The per-run download workspace.
//!
//! A randomly named temporary directory owns every file of one run. Dropping
//! a [`Workspace`] deletes it; [`Workspace::keep`] preserves it for
//! inspection after a failed verification.

use crate::error::Result;
use crate::naming::matches_package;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of workspace directory names.
const WORKSPACE_PREFIX: &str = "ppk-";

/// Temporary directory holding one run's downloads and outputs.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `root`, or the system temp dir.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PackError::Io`] if the directory cannot be
    /// created.
    pub fn create(root: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        log::debug!("created workspace {}", dir.path().display());
        Ok(Self { dir })
    }

    /// Workspace directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Regular files in the workspace, sorted by filename.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PackError::Io`] if the directory cannot be
    /// listed.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(self.path())? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    /// Delete every file belonging to one of the `excluded` packages.
    ///
    /// Returns the removed filenames, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PackError::Io`] if a file cannot be removed.
    pub fn exclude<S: AsRef<str>>(&self, excluded: &[S]) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        if excluded.is_empty() {
            return Ok(removed);
        }
        for path in self.files()? {
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if excluded.iter().any(|name| matches_package(filename, name.as_ref())) {
                fs::remove_file(&path)?;
                log::info!("excluded {filename}");
                removed.push(filename.to_owned());
            }
        }
        Ok(removed)
    }

    /// Stop managing the directory and return its path.
    #[must_use]
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }

    /// Delete the workspace and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::PackError::Io`] if removal fails.
    pub fn remove(self) -> Result<()> {
        let path = self.path().to_path_buf();
        self.dir.close()?;
        log::debug!("removed workspace {}", path.display());
        Ok(())
    }
}
