//! Artifact filename parsing and archive naming.
//!
//! Archive names follow the platform compatibility tag convention:
//!
//! - package mode: `{name}-{version}-{interpreter}-{abi}-{platform}`
//! - requirements mode: `req-0.0.0-{timestamp}-{username}-{platform}`
//!
//! Either form gains a trailing `-{requested_interpreter}` when the caller
//! asked for a specific interpreter version, because the interpreter tag of
//! what was downloaded may differ from what was requested. The archive
//! filename is `{stem}.7z` and the archive password is the SHA-256 of that
//! filename, so the receiving side can re-derive it from the name alone.

use crate::digest::Sha256Digest;
use chrono::{DateTime, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Version field used by requirements-mode archives.
pub const PLACEHOLDER_VERSION: &str = "0.0.0";

/// Leading field of requirements-mode archive names.
pub const REQUIREMENTS_MARKER: &str = "req";

/// Extension of the encrypted archive.
pub const ARCHIVE_EXTENSION: &str = "7z";

/// Timestamp layout embedded in requirements-mode archive names.
pub const ARCHIVE_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

const WHEEL_SUFFIX: &str = ".whl";
const SDIST_SUFFIX: &str = ".tar.gz";
const ZIP_SUFFIX: &str = ".zip";

/// Errors raised while parsing filenames or archive names.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    /// The file extension is not one of `.whl`, `.tar.gz` or `.zip`.
    #[error("unrecognised artifact type: {filename}")]
    UnrecognisedArtifact {
        /// The rejected filename.
        filename: String,
    },

    /// The extension is known but the name does not split into its fields.
    #[error("malformed artifact filename {filename}: {reason}")]
    MalformedArtifact {
        /// The rejected filename.
        filename: String,
        /// Description of the problem.
        reason: String,
    },

    /// An archive name stem does not split into its fields.
    #[error("malformed archive name {stem}: {reason}")]
    MalformedArchiveName {
        /// The rejected stem.
        stem: String,
        /// Description of the problem.
        reason: String,
    },

    /// The path has no UTF-8 filename component.
    #[error("path has no UTF-8 filename: {path}")]
    InvalidPath {
        /// Lossy rendering of the path.
        path: String,
    },
}

/// Distribution format of a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// A built distribution (`.whl`).
    Wheel,
    /// A source distribution (`.tar.gz`).
    SourceDistribution,
    /// A legacy zip source distribution (`.zip`).
    Zip,
}

/// Compatibility tags carried by a wheel filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTags {
    /// Interpreter tag, e.g. `cp311` or `py3`.
    pub interpreter: String,
    /// ABI tag, e.g. `cp311` or `none`.
    pub abi: String,
    /// Platform tag, e.g. `manylinux2014_x86_64` or `any`.
    pub platform: String,
}

/// A downloaded file together with the fields parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    filename: String,
    name: String,
    version: String,
    kind: ArtifactKind,
    tags: Option<WheelTags>,
}

impl Artifact {
    /// Full path of the artifact in the workspace.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Filename as it appears on disk and in the package index.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Package name parsed from the filename.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Package version parsed from the filename.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Distribution format.
    #[must_use]
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Wheel compatibility tags; `None` for source distributions.
    #[must_use]
    pub fn tags(&self) -> Option<&WheelTags> {
        self.tags.as_ref()
    }
}

/// Parse a downloaded artifact's filename into its name, version and tags.
///
/// Source distributions encode only `{name}-{version}` and the name may
/// itself contain hyphens, so the version is taken from the last hyphen
/// after the extension is stripped.
///
/// # Errors
///
/// Returns [`NamingError`] when the extension is unknown or the name does
/// not contain the expected fields.
///
/// # Examples
///
/// ```
/// use ppk::naming::{ArtifactKind, parse_artifact_filename};
/// use std::path::Path;
///
/// let artifact = parse_artifact_filename(Path::new("/tmp/ws/python-dateutil-2.8.2.tar.gz"))
///     .expect("valid sdist name");
/// assert_eq!(artifact.name(), "python-dateutil");
/// assert_eq!(artifact.version(), "2.8.2");
/// assert_eq!(artifact.kind(), ArtifactKind::SourceDistribution);
/// ```
pub fn parse_artifact_filename(path: &Path) -> Result<Artifact, NamingError> {
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| NamingError::InvalidPath {
            path: path.display().to_string(),
        })?
        .to_owned();

    let lower = filename.to_ascii_lowercase();
    let (kind, base) = if lower.ends_with(WHEEL_SUFFIX) {
        (ArtifactKind::Wheel, strip_suffix(&filename, WHEEL_SUFFIX))
    } else if lower.ends_with(SDIST_SUFFIX) {
        (
            ArtifactKind::SourceDistribution,
            strip_suffix(&filename, SDIST_SUFFIX),
        )
    } else if lower.ends_with(ZIP_SUFFIX) {
        (ArtifactKind::Zip, strip_suffix(&filename, ZIP_SUFFIX))
    } else {
        return Err(NamingError::UnrecognisedArtifact { filename });
    };

    let (name, version, tags) = match kind {
        ArtifactKind::Wheel => split_wheel(base, &filename)?,
        ArtifactKind::SourceDistribution | ArtifactKind::Zip => {
            let (name, version) = split_source(base, &filename)?;
            (name, version, None)
        }
    };

    Ok(Artifact {
        path: path.to_path_buf(),
        filename,
        name,
        version,
        kind,
        tags,
    })
}

fn strip_suffix<'a>(filename: &'a str, suffix: &str) -> &'a str {
    filename
        .get(..filename.len() - suffix.len())
        .unwrap_or(filename)
}

type WheelFields = (String, String, Option<WheelTags>);

fn split_wheel(base: &str, filename: &str) -> Result<WheelFields, NamingError> {
    let parts: Vec<&str> = base.split('-').collect();
    // name-version[-build]-interpreter-abi-platform
    if !(5..=6).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
        return Err(NamingError::MalformedArtifact {
            filename: filename.to_owned(),
            reason: format!("expected 5 or 6 hyphen-separated fields, got {}", parts.len()),
        });
    }
    let n = parts.len();
    let tags = WheelTags {
        interpreter: parts[n - 3].to_owned(),
        abi: parts[n - 2].to_owned(),
        platform: parts[n - 1].to_owned(),
    };
    Ok((parts[0].to_owned(), parts[1].to_owned(), Some(tags)))
}

fn split_source(base: &str, filename: &str) -> Result<(String, String), NamingError> {
    match base.rsplit_once('-') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok((name.to_owned(), version.to_owned()))
        }
        _ => Err(NamingError::MalformedArtifact {
            filename: filename.to_owned(),
            reason: "expected {name}-{version}".to_owned(),
        }),
    }
}

/// Normalise a package name to wheel-filename spelling.
///
/// Lowercases the name and collapses every run of `-`, `_` and `.` into a
/// single underscore.
///
/// # Examples
///
/// ```
/// use ppk::naming::normalise_name;
///
/// assert_eq!(normalise_name("Typing-Extensions"), "typing_extensions");
/// assert_eq!(normalise_name("zope.interface"), "zope_interface");
/// ```
#[must_use]
pub fn normalise_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('_');
            }
            in_separator = true;
        } else {
            out.extend(c.to_lowercase());
            in_separator = false;
        }
    }
    out
}

/// Return true when `filename` is a distribution of package `name`.
///
/// Distribution filenames do not always share the case or separators of the
/// requested name (`SQLAlchemy` for `sqlalchemy`), so the leading name
/// segment is normalised before comparison. The segment must be followed by
/// a hyphen and a version, which keeps `foo` from matching `foo-bar-1.0`.
///
/// # Examples
///
/// ```
/// use ppk::naming::matches_package;
///
/// assert!(matches_package("SQLAlchemy-2.0.23-cp311-cp311-manylinux2014_x86_64.whl", "sqlalchemy"));
/// assert!(matches_package("python-dateutil-2.8.2.tar.gz", "python_dateutil"));
/// assert!(!matches_package("packaging_extra-1.0-py3-none-any.whl", "packaging"));
/// ```
#[must_use]
pub fn matches_package(filename: &str, name: &str) -> bool {
    let wanted = normalise_name(name);
    if wanted.is_empty() {
        return false;
    }
    filename.match_indices('-').any(|(i, _)| {
        let starts_version = filename[i + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        starts_version && normalise_name(&filename[..i]) == wanted
    })
}

/// The archive password derived from an archive filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFile {
    /// Filename of the archive, `{stem}.7z`.
    pub filename: String,
    /// Hex SHA-256 of `filename`, used as the archive password.
    pub key: Sha256Digest,
}

/// Deterministic identity of an output archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveName {
    /// A single package and its dependencies.
    Package {
        /// Normalised package name.
        name: String,
        /// Resolved package version.
        version: String,
        /// Interpreter tag of the downloaded distribution.
        interpreter: String,
        /// ABI tag of the downloaded distribution.
        abi: String,
        /// Platform tag of the downloaded distribution.
        platform: String,
        /// Interpreter version explicitly requested by the caller.
        requested_interpreter: Option<String>,
    },
    /// Everything listed in a requirements file.
    Requirements {
        /// Creation time rendered with [`ARCHIVE_TIMESTAMP_FORMAT`].
        timestamp: String,
        /// Invoking user, with hyphens replaced by underscores.
        username: String,
        /// Target platform tag.
        platform: String,
        /// Interpreter version explicitly requested by the caller.
        requested_interpreter: Option<String>,
    },
}

impl ArchiveName {
    /// Archive identity for a single-package run.
    #[must_use]
    pub fn package(
        name: &str,
        version: &str,
        interpreter: &str,
        abi: &str,
        platform: &str,
        requested_interpreter: Option<&str>,
    ) -> Self {
        Self::Package {
            name: name.to_owned(),
            version: version.to_owned(),
            interpreter: interpreter.to_owned(),
            abi: abi.to_owned(),
            platform: platform.to_owned(),
            requested_interpreter: requested_interpreter.map(str::to_owned),
        }
    }

    /// Archive identity for a requirements-file run.
    #[must_use]
    pub fn requirements<Tz>(
        created: &DateTime<Tz>,
        username: &str,
        platform: &str,
        requested_interpreter: Option<&str>,
    ) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: fmt::Display,
    {
        Self::Requirements {
            timestamp: created.format(ARCHIVE_TIMESTAMP_FORMAT).to_string(),
            username: username.replace('-', "_"),
            platform: platform.to_owned(),
            requested_interpreter: requested_interpreter.map(str::to_owned),
        }
    }

    /// The version field: the package version or [`PLACEHOLDER_VERSION`].
    #[must_use]
    pub fn version(&self) -> &str {
        match self {
            Self::Package { version, .. } => version,
            Self::Requirements { .. } => PLACEHOLDER_VERSION,
        }
    }

    /// The platform field.
    #[must_use]
    pub fn platform(&self) -> &str {
        match self {
            Self::Package { platform, .. } | Self::Requirements { platform, .. } => platform,
        }
    }

    /// The filename stem, identical to the `Display` rendering.
    #[must_use]
    pub fn stem(&self) -> String {
        self.to_string()
    }

    /// Archive filename and the password derived from it.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppk::digest::Sha256Digest;
    /// use ppk::naming::ArchiveName;
    ///
    /// let name = ArchiveName::Package {
    ///     name: "six".to_owned(),
    ///     version: "1.16.0".to_owned(),
    ///     interpreter: "py2.py3".to_owned(),
    ///     abi: "none".to_owned(),
    ///     platform: "any".to_owned(),
    ///     requested_interpreter: None,
    /// };
    /// let file = name.archive_filename();
    /// assert_eq!(file.filename, "six-1.16.0-py2.py3-none-any.7z");
    /// assert_eq!(file.key, Sha256Digest::of_bytes(file.filename.as_bytes()));
    /// ```
    #[must_use]
    pub fn archive_filename(&self) -> ArchiveFile {
        let filename = format!("{self}.{ARCHIVE_EXTENSION}");
        let key = Sha256Digest::of_bytes(filename.as_bytes());
        ArchiveFile { filename, key }
    }

    /// Split an archive stem (or filename) back into its fields.
    ///
    /// # Errors
    ///
    /// Returns [`NamingError::MalformedArchiveName`] when the stem does not
    /// have five or six hyphen-separated fields.
    pub fn parse(stem: &str) -> Result<Self, NamingError> {
        let stem = stem
            .strip_suffix(&format!(".{ARCHIVE_EXTENSION}"))
            .unwrap_or(stem);
        let parts: Vec<&str> = stem.split('-').collect();
        if !(5..=6).contains(&parts.len()) || parts.iter().any(|p| p.is_empty()) {
            return Err(malformed(
                stem,
                format!("expected 5 or 6 hyphen-separated fields, got {}", parts.len()),
            ));
        }
        let requested_interpreter = parts.get(5).map(|s| (*s).to_owned());

        // A package called `req` only differs from a requirements archive by
        // its version field.
        if parts[0] == REQUIREMENTS_MARKER && parts[1] == PLACEHOLDER_VERSION {
            return Ok(Self::Requirements {
                timestamp: parts[2].to_owned(),
                username: parts[3].to_owned(),
                platform: parts[4].to_owned(),
                requested_interpreter,
            });
        }

        Ok(Self::Package {
            name: parts[0].to_owned(),
            version: parts[1].to_owned(),
            interpreter: parts[2].to_owned(),
            abi: parts[3].to_owned(),
            platform: parts[4].to_owned(),
            requested_interpreter,
        })
    }
}

fn malformed(stem: &str, reason: String) -> NamingError {
    NamingError::MalformedArchiveName {
        stem: stem.to_owned(),
        reason,
    }
}

impl fmt::Display for ArchiveName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requested = match self {
            Self::Package {
                name,
                version,
                interpreter,
                abi,
                platform,
                requested_interpreter,
            } => {
                write!(f, "{name}-{version}-{interpreter}-{abi}-{platform}")?;
                requested_interpreter
            }
            Self::Requirements {
                timestamp,
                username,
                platform,
                requested_interpreter,
            } => {
                write!(
                    f,
                    "{REQUIREMENTS_MARKER}-{PLACEHOLDER_VERSION}-{timestamp}-{username}-{platform}"
                )?;
                requested_interpreter
            }
        };
        if let Some(requested) = requested {
            write!(f, "-{requested}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "naming_tests.rs"]
mod tests;
