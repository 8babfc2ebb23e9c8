//! Package index queries.
//!
//! The checksum test compares local digests against the digests the index
//! publishes for each release file. [`PackageIndex`] is the seam; the
//! production implementation talks to the PyPI JSON API over `ureq`.

use crate::digest::Sha256Digest;
use serde::Deserialize;
use std::time::Duration;

/// Number of reachability probes before the index is declared unreachable.
pub const REACHABILITY_ATTEMPTS: u32 = 3;

/// A file published for a release, with its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFile {
    /// Distribution filename.
    pub filename: String,
    /// Published SHA-256 digest.
    pub sha256: Sha256Digest,
}

/// Errors arising from package index queries.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// HTTP request failed.
    #[error("request to {url} failed: {reason}")]
    Http {
        /// The URL that was requested.
        url: String,
        /// A human-readable description of the failure.
        reason: String,
    },

    /// The release does not exist (HTTP 404).
    #[error("release not found: {url}")]
    NotFound {
        /// The URL that returned 404.
        url: String,
    },

    /// The response body did not match the expected JSON shape.
    #[error("unexpected response from {url}: {reason}")]
    Parse {
        /// The URL that was requested.
        url: String,
        /// Description of the problem.
        reason: String,
    },
}

/// Read access to a package index.
#[cfg_attr(test, mockall::automock)]
pub trait PackageIndex {
    /// Whether the index answers at all.
    fn is_reachable(&self) -> bool;

    /// Files published for `name` at `version`.
    ///
    /// Returns `Ok(None)` when the index has no such release.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError`] for transport failures and malformed
    /// responses.
    fn release_files(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Vec<ReleaseFile>>, IndexError>;
}

/// Probe `index` up to [`REACHABILITY_ATTEMPTS`] times.
pub fn probe_reachable(index: &dyn PackageIndex) -> bool {
    (1..=REACHABILITY_ATTEMPTS).any(|attempt| {
        let reachable = index.is_reachable();
        if !reachable {
            log::debug!("index probe {attempt}/{REACHABILITY_ATTEMPTS} failed");
        }
        reachable
    })
}

/// The PyPI JSON API.
pub struct PyPiIndex {
    base_url: String,
    agent: ureq::Agent,
}

impl PyPiIndex {
    /// Client for the index at `base_url` with a per-request timeout.
    #[must_use]
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            agent: ureq::Agent::new_with_config(config),
        }
    }

    /// URL of the JSON document for one release.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppk::index::PyPiIndex;
    /// use std::time::Duration;
    ///
    /// let index = PyPiIndex::new("https://pypi.org/", Duration::from_secs(5));
    /// assert_eq!(
    ///     index.release_url("six", "1.16.0"),
    ///     "https://pypi.org/pypi/six/1.16.0/json"
    /// );
    /// ```
    #[must_use]
    pub fn release_url(&self, name: &str, version: &str) -> String {
        format!("{}/pypi/{name}/{version}/json", self.base_url)
    }
}

impl PackageIndex for PyPiIndex {
    fn is_reachable(&self) -> bool {
        match self.agent.get(self.base_url.as_str()).call() {
            Ok(_) | Err(ureq::Error::StatusCode(_)) => true,
            Err(e) => {
                log::debug!("{} did not answer: {e}", self.base_url);
                false
            }
        }
    }

    fn release_files(
        &self,
        name: &str,
        version: &str,
    ) -> Result<Option<Vec<ReleaseFile>>, IndexError> {
        let url = self.release_url(name, version);
        log::debug!("fetching {url}");
        let response = match self.agent.get(url.as_str()).call() {
            Ok(response) => response,
            Err(e) => {
                return match map_ureq_error(&url, &e) {
                    IndexError::NotFound { .. } => Ok(None),
                    other => Err(other),
                };
            }
        };
        let body = response
            .into_body()
            .read_to_string()
            .map_err(|e| IndexError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        parse_release_json(&url, &body).map(Some)
    }
}

#[derive(Deserialize)]
struct ReleaseDocument {
    urls: Vec<ReleaseUrl>,
}

#[derive(Deserialize)]
struct ReleaseUrl {
    filename: String,
    digests: Digests,
}

#[derive(Deserialize)]
struct Digests {
    sha256: String,
}

/// Extract the release files from a PyPI release JSON document.
///
/// # Errors
///
/// Returns [`IndexError::Parse`] when the document is not valid JSON, lacks
/// the `urls` array, or carries a malformed digest.
pub fn parse_release_json(url: &str, body: &str) -> Result<Vec<ReleaseFile>, IndexError> {
    let parse_error = |reason: String| IndexError::Parse {
        url: url.to_owned(),
        reason,
    };
    let document: ReleaseDocument =
        serde_json::from_str(body).map_err(|e| parse_error(e.to_string()))?;
    document
        .urls
        .into_iter()
        .map(|entry| {
            let sha256 = Sha256Digest::try_from(entry.digests.sha256)
                .map_err(|e| parse_error(format!("{}: {e}", entry.filename)))?;
            Ok(ReleaseFile {
                filename: entry.filename,
                sha256,
            })
        })
        .collect()
}

/// Map a ureq error to an [`IndexError`].
fn map_ureq_error(url: &str, err: &ureq::Error) -> IndexError {
    match err {
        ureq::Error::StatusCode(404) => IndexError::NotFound {
            url: url.to_owned(),
        },
        other => IndexError::Http {
            url: url.to_owned(),
            reason: other.to_string(),
        },
    }
}
