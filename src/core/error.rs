//! Error handling for otad
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** ([`OtaError`]) so callers can distinguish
//!    retryable failures from terminal ones,
//! 2. **User-friendly reporting** ([`ErrorContext`]) for the CLI surface.
//!
//! The taxonomy matters operationally: transient errors (one mirror down, one
//! checksum mismatch) are logged and iterated past inside the component that
//! saw them and only surface once every candidate is exhausted. Not-found
//! errors are typed so the orchestrator can fall back differently for a
//! missing release (use the cached descriptor) than for a missing package
//! (fail the cycle). Install failures are reported through the status channel
//! and never crash the process.

use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for otad operations.
#[derive(Error, Debug)]
pub enum OtaError {
    /// No mirror produced a parseable release descriptor and no cached
    /// descriptor exists to fall back on.
    #[error("release '{tag}' not found on any mirror and no cached release is available")]
    ReleaseNotFound {
        /// The release tag that was requested (e.g. `latest`).
        tag: String,
    },

    /// Every mirror was tried and none served a package that passed
    /// verification. This is the only unrecoverable fetch error.
    #[error("package for release {version} could not be found on any mirror")]
    PackageNotFound {
        /// Version of the release whose package is missing everywhere.
        version: String,
    },

    /// A downloaded file did not match its manifest digest.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File that failed verification.
        file: String,
        /// Digest the manifest promised.
        expected: String,
        /// Digest actually computed.
        actual: String,
    },

    /// The checksum manifest has no entry for the file we downloaded.
    #[error("no checksum entry for {file} in manifest")]
    ChecksumMissing {
        /// File name looked up in the manifest.
        file: String,
    },

    /// The running machine's architecture has no package in the release.
    #[error("unsupported architecture: {arch}")]
    UnsupportedArchitecture {
        /// Raw architecture string reported by the runtime.
        arch: String,
    },

    /// A version string could not be normalized into the custom order.
    #[error("invalid version string '{version}': {reason}")]
    InvalidVersion {
        /// The offending raw version string.
        version: String,
        /// Parser detail.
        reason: String,
    },

    /// The pre-staged offline bundle is absent from its fixed path.
    #[error("offline bundle not found at {}", path.display())]
    BundleNotFound {
        /// Expected staging path.
        path: PathBuf,
    },

    /// The descriptor embedded in an offline bundle could not be decoded.
    #[error("undecodable release descriptor embedded in bundle: {reason}")]
    DescriptorDecode {
        /// Decode failure detail (base64 or YAML).
        reason: String,
    },

    /// An install was requested while another install is still running.
    #[error("an installation is already in progress")]
    InstallInProgress,

    /// The install step itself failed; the message is surfaced verbatim
    /// through the status channel.
    #[error("{message}")]
    InstallFailed {
        /// Underlying failure text, e.g. "rauc is not compatible".
        message: String,
    },

    /// A `rauc` invocation failed or produced unusable output.
    #[error("bank updater command failed: {reason}")]
    BankCommandError {
        /// Captured stderr or spawn failure detail.
        reason: String,
    },

    /// The cache filesystem has too little space for the staged artifact.
    #[error("insufficient free space: {available} bytes available, {required} required")]
    InsufficientSpace {
        /// Bytes free on the cache filesystem.
        available: u64,
        /// Bytes needed before install proceeds.
        required: u64,
    },

    /// No downloaded or staged artifact exists for the release being
    /// verified.
    #[error("no artifact available for release {version}")]
    ArtifactNotFound {
        /// Release version whose artifact is missing.
        version: String,
    },

    /// Generic I/O failure with operation context.
    #[error("file system error during {operation}: {source}")]
    FileSystemError {
        /// What was being done when the failure occurred.
        operation: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Automatic conversion for [`std::io::Error`].
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Automatic conversion for HTTP failures.
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Automatic conversion for descriptor parse failures.
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Automatic conversion for semver parse failures.
    #[error("semver error: {0}")]
    SemverError(#[from] semver::Error),

    /// Automatic conversion for config parse failures.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Catch-all for errors that don't fit other categories.
    #[error("{0}")]
    Other(String),
}

impl OtaError {
    /// Whether this error is transient and worth retrying against the next
    /// mirror or on the next cron cycle.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::HttpError(_) | Self::ChecksumMismatch { .. })
    }
}

/// Wrapper adding a user-facing message and an optional suggestion to an
/// underlying error, displayed by the CLI on fatal exits.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error.
    pub error: anyhow::Error,
    /// Optional actionable suggestion shown below the error.
    pub suggestion: Option<String>,
}

impl ErrorContext {
    /// Wrap an error without a suggestion.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self { error: error.into(), suggestion: None }
    }

    /// Attach an actionable suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Print the error (and suggestion, if any) to stderr with color.
    pub fn display(&self) {
        eprintln!("{} {}", "error:".red().bold(), self.error);
        if let Some(suggestion) = &self.suggestion {
            eprintln!("{} {}", "hint:".yellow().bold(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nhint: {suggestion}")?;
        }
        Ok(())
    }
}

/// Convert any error into an [`ErrorContext`] with a suggestion keyed off
/// the typed variant where one is known.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let suggestion = match error.downcast_ref::<OtaError>() {
        Some(OtaError::ReleaseNotFound { .. }) => {
            Some("check the configured mirrors and network connectivity".to_string())
        }
        Some(OtaError::BundleNotFound { path }) => {
            Some(format!("stage the offline bundle at {} before installing", path.display()))
        }
        Some(OtaError::InstallInProgress) => {
            Some("wait for the running installation to finish and retry".to_string())
        }
        Some(OtaError::UnsupportedArchitecture { .. }) => {
            Some("this release ships no package for the local architecture".to_string())
        }
        Some(OtaError::InsufficientSpace { .. }) => {
            Some("free up space in the cache directory and retry".to_string())
        }
        _ => None,
    };
    ErrorContext { error, suggestion }
}
