//! Error taxonomy shared by every engine component.
//!
//! `EngineError` is `Clone` so one install outcome can be handed to every
//! caller that was waiting on the same artifact. Foreign errors are kept as
//! rendered strings for the same reason.

use std::path::Path;

use thiserror::Error;

/// Errors surfaced by the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Version discovery failed after exhausting retries.
    #[error("Failed to list versions of {package} after {attempts} attempt(s): {message}")]
    ResolutionFailed {
        /// Package identity (`registry/name`).
        package: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last underlying error.
        message: String,
    },

    /// No candidate version matched the filters.
    #[error("No version of {package} matches {filter}")]
    NoVersionFound {
        /// Package identity.
        package: String,
        /// Human-readable description of the filters.
        filter: String,
    },

    /// Neither the template nor any override covers the platform.
    #[error("{package}@{version} is not available for {platform}")]
    UnsupportedPlatform {
        /// Package identity.
        package: String,
        /// Resolved version.
        version: String,
        /// `os/arch` of the host.
        platform: String,
    },

    /// The asset is packed in a format the extractor does not handle.
    #[error("{package}@{version}: unsupported archive format '{format}' ({asset})")]
    UnsupportedArchive {
        /// Package identity.
        package: String,
        /// Resolved version.
        version: String,
        /// Asset filename.
        asset: String,
        /// Detected or declared format.
        format: String,
    },

    /// Download failed after exhausting retries, or with a non-retryable status.
    #[error("Failed to download {url} for {package}@{version} after {attempts} attempt(s): {message}")]
    DownloadFailed {
        /// Package identity.
        package: String,
        /// Resolved version.
        version: String,
        /// Requested URL.
        url: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last underlying error.
        message: String,
    },

    /// The computed digest differs from the expected one. Never retried.
    #[error(
        "Checksum mismatch for {package}@{version} ({asset}): expected {algorithm}:{expected}, got {actual}"
    )]
    ChecksumMismatch {
        /// Package identity.
        package: String,
        /// Resolved version.
        version: String,
        /// Asset filename.
        asset: String,
        /// Algorithm used for both digests.
        algorithm: String,
        /// Digest from the ledger or checksum file.
        expected: String,
        /// Digest of the downloaded bytes.
        actual: String,
    },

    /// No checksum is known for an artifact while checksums are required.
    #[error("No checksum recorded for {package}@{version} ({asset})")]
    ChecksumMissing {
        /// Package identity.
        package: String,
        /// Resolved version.
        version: String,
        /// Asset filename.
        asset: String,
    },

    /// A configuration file or registry is not allowed by policy.
    #[error("Policy violation: {path} is not allowed ({reason})")]
    PolicyViolation {
        /// Offending path or registry identity.
        path: String,
        /// The rule responsible, or the absence of one.
        reason: String,
    },

    /// Work was stopped by a cancellation signal.
    #[error("Operation cancelled")]
    Cancelled,

    /// Local filesystem fault.
    #[error("{context}: {message}")]
    Io {
        /// What was being done.
        context: String,
        /// Rendered io error.
        message: String,
    },

    /// The checksum ledger could not be read or written.
    #[error("Checksum ledger {path}: {message}")]
    Ledger {
        /// Ledger file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A policy document could not be loaded.
    #[error("Policy document {path}: {message}")]
    PolicyLoad {
        /// Policy file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A manifest could not be parsed.
    #[error("Manifest {path}: {message}")]
    Manifest {
        /// Manifest file.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A registry could not be loaded or is malformed.
    #[error("Registry '{registry}': {message}")]
    Registry {
        /// Registry name.
        registry: String,
        /// What went wrong.
        message: String,
    },

    /// The registry has no metadata for the package.
    #[error("Package {package} not found in registry '{registry}'")]
    PackageNotFound {
        /// Registry name.
        registry: String,
        /// Requested package.
        package: String,
    },

    /// A command name cannot be used as a shim file name.
    #[error("Invalid command name '{command}': {reason}")]
    InvalidCommand {
        /// The rejected name.
        command: String,
        /// Which rule it breaks.
        reason: String,
    },

    /// The artifact is not in the store and the caller may not install it.
    #[error("{package}@{version} is not installed")]
    NotInstalled {
        /// Package identity.
        package: String,
        /// Resolved version.
        version: String,
    },

    /// The installer was handed a package without a resolved version.
    #[error("{package} has no resolved version")]
    Unresolved {
        /// Package display string.
        package: String,
    },
}

impl EngineError {
    /// Build an [`EngineError::Io`] from an io error and what was being done.
    pub fn io(context: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// Build an [`EngineError::Io`] naming the path involved.
    pub fn io_at(action: &str, path: &Path, err: &std::io::Error) -> Self {
        Self::io(format!("Failed to {action} {}", path.display()), err)
    }

    /// Returns `true` for transient faults worth retrying.
    ///
    /// Integrity, policy and platform errors are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResolutionFailed { .. } | Self::DownloadFailed { .. })
    }

    /// Returns `true` if the error came from a cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
