//! ppk library.
//!
//! Downloads Python packages with pip, verifies every downloaded file against
//! the index's published digest and a vulnerability database, records the
//! results in a tamper-evident log, and seals passing downloads into an
//! encrypted `.7z` archive for transfer into an isolated environment. The
//! `ppk` binary is a thin shell over [`pipeline`] and [`unpack`].
//!
//! # Modules
//!
//! - [`archive`] - Encrypted archive creation with `7z`
//! - [`cli`] - Command-line argument definitions
//! - [`config`] - TOML configuration loading
//! - [`digest`] - SHA-256 digests
//! - [`dirs`] - Directory resolution abstraction for platform-specific paths
//! - [`download`] - `pip download` invocation and the missing-wheel retry
//! - [`error`] - Error types
//! - [`exec`] - External command execution
//! - [`host`] - Host, user and platform tag detection
//! - [`index`] - Package index client
//! - [`ledger`] - Verification log and integrity key
//! - [`naming`] - Artifact and archive naming conventions
//! - [`output`] - User-facing messages and reports
//! - [`pipeline`] - Packaging pipeline orchestration
//! - [`unpack`] - Hand-off to the unpack binary and mirror refresh
//! - [`verify`] - Verification tests and their registry
//! - [`vulnerability`] - Vulnerability database client
//! - [`workspace`] - Per-run download workspace

pub mod archive;
pub mod cli;
pub mod config;
pub mod digest;
pub mod dirs;
pub mod download;
pub mod error;
pub mod exec;
pub mod host;
pub mod index;
pub mod ledger;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod unpack;
pub mod verify;
pub mod vulnerability;
pub mod workspace;

#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;
