//! Platform directory lookup.
//!
//! The desktop (default archive destination) and the configuration directory
//! are resolved through [`BaseDirs`] so tests can substitute fixed paths.

use crate::error::{PackError, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::path::PathBuf;

/// Application directory name under the platform configuration directory.
pub const APP_DIR: &str = "ppk";

/// Configuration filename inside [`APP_DIR`].
pub const CONFIG_FILE: &str = "ppk.toml";

/// Source of platform-specific user directories.
#[cfg_attr(test, mockall::automock)]
pub trait BaseDirs {
    /// The user's home directory.
    fn home_dir(&self) -> Option<PathBuf>;

    /// The user's desktop directory.
    fn desktop_dir(&self) -> Option<PathBuf>;

    /// The platform configuration directory, e.g. `~/.config`.
    fn config_dir(&self) -> Option<PathBuf>;
}

/// [`BaseDirs`] backed by `directories-next`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBaseDirs;

impl BaseDirs for SystemBaseDirs {
    fn home_dir(&self) -> Option<PathBuf> {
        directories_next::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
    }

    fn desktop_dir(&self) -> Option<PathBuf> {
        directories_next::UserDirs::new().and_then(|d| d.desktop_dir().map(PathBuf::from))
    }

    fn config_dir(&self) -> Option<PathBuf> {
        directories_next::BaseDirs::new().map(|d| d.config_dir().to_path_buf())
    }
}

/// Default location of the configuration file, if a config dir exists.
#[must_use]
pub fn default_config_path(dirs: &dyn BaseDirs) -> Option<PathBuf> {
    dirs.config_dir()
        .map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Directory the archive is written to.
///
/// An explicitly configured directory wins. Otherwise the desktop is used,
/// falling back to the home directory on systems without one.
///
/// # Errors
///
/// Returns [`PackError::MissingDirectory`] when neither directory can be
/// determined, or [`PackError::NonUtf8Path`] when it is not valid UTF-8.
pub fn output_dir(dirs: &dyn BaseDirs, configured: Option<&Utf8Path>) -> Result<Utf8PathBuf> {
    if let Some(dir) = configured {
        return Ok(dir.to_owned());
    }
    let dir = dirs
        .desktop_dir()
        .or_else(|| dirs.home_dir())
        .ok_or(PackError::MissingDirectory { what: "desktop" })?;
    Utf8PathBuf::from_path_buf(dir).map_err(|path| PackError::NonUtf8Path {
        path: path.display().to_string(),
    })
}
