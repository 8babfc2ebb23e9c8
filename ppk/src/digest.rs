//! SHA-256 digests for artifacts, log files and archive keys.
//!
//! [`Sha256Digest`] wraps a validated 64-character lowercase hex string so
//! published digests from the package index and locally computed digests
//! compare byte-for-byte.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Expected length of a hex-encoded SHA-256 digest.
const DIGEST_HEX_LEN: usize = 64;

/// A digest string that is not a well-formed SHA-256 hex value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid SHA-256 digest: {reason}")]
pub struct InvalidDigest {
    /// Description of the validation failure.
    pub reason: String,
}

/// A validated hex-encoded SHA-256 digest string.
///
/// # Examples
///
/// ```
/// use ppk::digest::Sha256Digest;
///
/// let hex = "a".repeat(64);
/// let digest: Sha256Digest = hex.as_str().try_into().expect("valid digest");
/// assert_eq!(digest.as_str().len(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sha256Digest(String);

impl Sha256Digest {
    /// Digest of an in-memory byte string.
    ///
    /// # Examples
    ///
    /// ```
    /// use ppk::digest::Sha256Digest;
    ///
    /// let digest = Sha256Digest::of_bytes(b"");
    /// assert_eq!(
    ///     digest.as_str(),
    ///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    /// );
    /// ```
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    /// Digest of a file, read in chunks.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while opening or reading the file.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = [0u8; 8192];
        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Return the digest as a hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the wrapper and return the inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<&str> for Sha256Digest {
    type Error = InvalidDigest;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        validate_sha256(value)?;
        Ok(Self(value.to_owned()))
    }
}

impl TryFrom<String> for Sha256Digest {
    type Error = InvalidDigest;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_sha256(&value)?;
        Ok(Self(value))
    }
}

impl AsRef<str> for Sha256Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate that `value` is a well-formed hex-encoded SHA-256 digest.
fn validate_sha256(value: &str) -> Result<(), InvalidDigest> {
    if value.len() != DIGEST_HEX_LEN {
        return Err(InvalidDigest {
            reason: format!(
                "expected {DIGEST_HEX_LEN} hex characters, got {}",
                value.len()
            ),
        });
    }
    if let Some(bad) = value.chars().find(|c| !c.is_ascii_hexdigit()) {
        return Err(InvalidDigest {
            reason: format!("non-hex character '{bad}'"),
        });
    }
    if value.chars().any(|c| c.is_ascii_uppercase()) {
        return Err(InvalidDigest {
            reason: "digest must be lowercase".to_owned(),
        });
    }
    Ok(())
}
