//! Error types for the installer.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for installer operations.
pub type InstallResult<T> = Result<T, InstallError>;

/// Errors that can occur while installing the runtime.
#[derive(Debug, Error)]
pub enum InstallError {
    /// No candidate volume has enough free space.
    #[error("no storage volume with at least {min_free_kb} KB free was found")]
    NoStorageFound { min_free_kb: u64 },

    /// The device reports an architecture we ship no binaries for.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// The architecture query itself could not be run.
    #[error("failed to detect system architecture: {reason}")]
    ArchitectureQueryFailed { reason: String },

    /// A required key is absent (or empty) in the release manifest.
    #[error("release manifest is missing the {field} field")]
    MissingManifestField { field: String },

    /// One source failed; the next source will be tried.
    #[error("source {source_url} failed: {cause}")]
    SourceFetchFailed {
        source_url: String,
        cause: Box<InstallError>,
    },

    /// Every source failed for an artifact.
    #[error("all download sources failed for {filename}: {}", last_cause(.failures))]
    AllSourcesExhausted {
        filename: String,
        failures: Vec<InstallError>,
    },

    /// Downloaded content does not match the manifest digest.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// Server answered with something other than 200.
    #[error("request to {url} returned HTTP status {status}")]
    HttpStatus { url: String, status: u16 },

    /// Transport-level failure (DNS, TLS, connection reset, ...).
    #[error("HTTP request to {url} failed: {reason}")]
    Http { url: String, reason: String },

    /// Connection or transfer exceeded its deadline.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// An archive member could not be materialized.
    #[error("failed to extract {member}: {cause}")]
    ExtractionFailed { member: String, cause: io::Error },

    /// The deployment script exited unsuccessfully.
    #[error("deployment script failed with {}", exit_description(.exit_code))]
    ScriptExecutionFailed { exit_code: Option<i32> },

    /// The deployment script is not where the runtime package should have put it.
    #[error("deployment script not found: {}", .0.display())]
    DeployScriptMissing(PathBuf),

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file or directory.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listing or signalling service processes failed.
    #[error("process control failed: {reason}")]
    ProcessControl { reason: String },
}

impl InstallError {
    /// Whether this failure is scoped to a single download source.
    ///
    /// Recoverable errors make the fetcher fall through to the next source
    /// instead of aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SourceFetchFailed { .. }
                | Self::ChecksumMismatch { .. }
                | Self::HttpStatus { .. }
                | Self::Http { .. }
                | Self::Timeout { .. }
        )
    }
}

fn last_cause(failures: &[InstallError]) -> String {
    match failures.last() {
        Some(InstallError::SourceFetchFailed { cause, .. }) => cause.to_string(),
        Some(other) => other.to_string(),
        None => "no sources configured".to_string(),
    }
}

fn exit_description(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
