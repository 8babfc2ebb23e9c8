//! Configuration file loading.
//!
//! Settings live in a TOML file with one table per concern. Every field has
//! a default, so an absent file or an empty table behaves like the stock
//! configuration. Unknown keys are rejected so typos surface immediately.

use crate::dirs::{BaseDirs, default_config_path};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while locating or parsing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// The file exists but could not be read.
    #[error("failed to read configuration file {path}")]
    Read {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("invalid configuration in {path}")]
    Parse {
        /// Path of the file.
        path: String,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
}

/// Complete ppk configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Which verification tests run and how they report.
    pub verification: VerificationConfig,
    /// Package index endpoints.
    pub index: IndexConfig,
    /// Vulnerability database endpoint.
    pub vulnerability: VulnerabilityConfig,
    /// External program names.
    pub tools: ToolsConfig,
    /// Filesystem locations.
    pub paths: PathsConfig,
}

/// `[verification]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VerificationConfig {
    /// Test names, run in this order for every artifact.
    pub tests: Vec<String>,
    /// Print vulnerability detail tables.
    pub verbose: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            tests: vec!["checksum".to_owned(), "vulnerability".to_owned()],
            verbose: true,
        }
    }
}

/// `[index]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Base URL of the JSON API.
    pub url: String,
    /// Simple repository URL handed to `pip download -i`.
    pub simple_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl IndexConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "https://pypi.org".to_owned(),
            simple_url: "https://pypi.org/simple/".to_owned(),
            timeout_secs: 5,
        }
    }
}

/// `[vulnerability]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct VulnerabilityConfig {
    /// Base URL of the OSV API.
    pub url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl VulnerabilityConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for VulnerabilityConfig {
    fn default() -> Self {
        Self {
            url: "https://api.osv.dev".to_owned(),
            timeout_secs: 10,
        }
    }
}

/// `[tools]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// Download tool.
    pub pip: String,
    /// 7-Zip executable.
    pub archiver: String,
    /// Upper bound on any single subprocess, in seconds.
    pub timeout_secs: u64,
}

impl ToolsConfig {
    /// Upper bound on any single subprocess.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pip: "pip".to_owned(),
            archiver: "7z".to_owned(),
            timeout_secs: 1800,
        }
    }
}

/// `[paths]` table.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    /// Archive destination; the desktop when unset.
    pub output_dir: Option<Utf8PathBuf>,
    /// Parent of the temporary workspace; the system temp dir when unset.
    pub workspace_root: Option<Utf8PathBuf>,
    /// Unpack binary; `upack` from `PATH` when unset.
    pub unpack: Option<Utf8PathBuf>,
    /// Mirror refresh program, looked up on `PATH`.
    pub pip_refresh: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            workspace_root: None,
            unpack: None,
            pip_refresh: "pip-refresh".to_owned(),
        }
    }
}

impl Config {
    /// Parse configuration text; `origin` names the source in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppk::config::Config;
    ///
    /// let config = Config::from_toml_str("[index]\ntimeout_secs = 2\n", "inline")
    ///     .expect("valid config");
    /// assert_eq!(config.index.timeout_secs, 2);
    /// assert_eq!(config.tools.archiver, "7z");
    /// ```
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_owned(),
            source: Box::new(source),
        })
    }

    /// Load configuration using the standard lookup order.
    ///
    /// An explicit path must exist. Without one the per-user file
    /// `<config_dir>/ppk/ppk.toml` is used when present, and built-in
    /// defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an explicit file is missing, or when the
    /// selected file cannot be read or parsed.
    pub fn load(explicit: Option<&Utf8Path>, dirs: &dyn BaseDirs) -> Result<Self, ConfigError> {
        let path: PathBuf = match explicit {
            Some(path) if path.as_std_path().is_file() => path.as_std_path().to_path_buf(),
            Some(path) => {
                return Err(ConfigError::NotFound {
                    path: path.to_string(),
                });
            }
            None => match default_config_path(dirs) {
                Some(path) if path.is_file() => path,
                _ => {
                    log::debug!("no configuration file found; using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let origin = path.display().to_string();
        log::debug!("loading configuration from {origin}");
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: origin.clone(),
            source,
        })?;
        Self::from_toml_str(&text, &origin)
    }
}
