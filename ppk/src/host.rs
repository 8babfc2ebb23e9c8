//! Facts about the machine ppk runs on.
//!
//! Used for the ledger's `host` and `user` columns, the username field of
//! requirements-mode archive names and the default platform tag.

use std::env;

/// Placeholder recorded when a host fact cannot be determined.
pub const UNKNOWN: &str = "unknown";

/// Host name and invoking user, captured once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Network host name.
    pub hostname: String,
    /// Login name of the invoking user.
    pub username: String,
}

impl HostInfo {
    /// Build host facts from explicit values.
    #[must_use]
    pub fn new(hostname: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
        }
    }

    /// Detect the host name and user of the current process.
    ///
    /// Missing values are recorded as [`UNKNOWN`] rather than failing the
    /// run.
    #[must_use]
    pub fn detect() -> Self {
        Self {
            hostname: hostname().unwrap_or_else(|| UNKNOWN.to_owned()),
            username: username().unwrap_or_else(|| UNKNOWN.to_owned()),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn username() -> Option<String> {
    if cfg!(windows) {
        non_empty_var("USERNAME")
    } else {
        non_empty_var("USER").or_else(|| non_empty_var("LOGNAME"))
    }
}

fn hostname() -> Option<String> {
    let name = gethostname::gethostname().to_string_lossy().trim().to_owned();
    (!name.is_empty()).then_some(name)
}

/// Platform compatibility tag for the given OS and architecture.
///
/// Linux maps to `manylinux2014_<arch>`, macOS to `macosx_<arch>` and
/// Windows to the `win32` / `win_<arch>` tags pip uses.
///
/// # Examples
///
/// ```
/// use ppk::host::platform_tag;
///
/// assert_eq!(platform_tag("linux", "x86_64"), "manylinux2014_x86_64");
/// assert_eq!(platform_tag("windows", "x86_64"), "win_amd64");
/// ```
#[must_use]
pub fn platform_tag(os: &str, arch: &str) -> String {
    match os {
        "linux" => format!("manylinux2014_{arch}"),
        "macos" => match arch {
            "aarch64" => "macosx_arm64".to_owned(),
            other => format!("macosx_{other}"),
        },
        "windows" => match arch {
            "x86_64" => "win_amd64".to_owned(),
            "x86" => "win32".to_owned(),
            "aarch64" => "win_arm64".to_owned(),
            other => format!("win_{other}"),
        },
        other => format!("{other}_{arch}"),
    }
}

/// Platform compatibility tag of the running host.
#[must_use]
pub fn local_platform() -> String {
    platform_tag(env::consts::OS, env::consts::ARCH)
}
