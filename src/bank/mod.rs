//! Wrapper around the external dual-bank update subsystem (`rauc`).
//!
//! otad delegates bundle installation and compatibility checking to the
//! system `rauc` binary the same way a package manager delegates to system
//! git: spawn the command, bound it with a timeout, capture output, and
//! surface stderr in typed errors. The bundle wire format stays opaque;
//! only `rauc` reads it.

use crate::constants::{BANK_INFO_TIMEOUT, BANK_INSTALL_TIMEOUT};
use crate::core::OtaError;
use crate::release::Release;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

/// Message surfaced through the status channel when a bundle does not match
/// the appliance's compatible string.
pub const INCOMPATIBLE_MESSAGE: &str = "rauc is not compatible";

/// Metadata `rauc info` reports for a bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct BundleInfo {
    /// Compatible string the bundle was built for.
    pub compatible: String,
    /// Bundle version label.
    #[serde(default)]
    pub version: String,
    /// Base64-encoded release descriptor embedded in the bundle metadata,
    /// present on bundles produced by the release pipeline.
    #[serde(default)]
    pub release: Option<String>,
}

/// Client for the system `rauc` binary.
pub struct RaucClient {
    binary: PathBuf,
    sys_root: PathBuf,
}

impl RaucClient {
    /// Client using `rauc` from `PATH` against the given system root.
    #[must_use]
    pub fn new(sys_root: PathBuf) -> Self {
        Self { binary: PathBuf::from("rauc"), sys_root }
    }

    /// Override the binary path. Used by tests to point at a stub script.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Inspect a bundle's metadata via `rauc info --output-format=json`.
    ///
    /// # Errors
    ///
    /// [`OtaError::BankCommandError`] when the command fails or its output
    /// is not the expected JSON.
    pub async fn info(&self, bundle: &Path) -> Result<BundleInfo, OtaError> {
        let stdout = self
            .run(
                &["info", "--output-format=json", &bundle.display().to_string()],
                BANK_INFO_TIMEOUT,
            )
            .await?;
        serde_json::from_str(&stdout).map_err(|e| OtaError::BankCommandError {
            reason: format!("unparseable rauc info output: {e}"),
        })
    }

    /// Install a bundle to the inactive bank.
    ///
    /// # Errors
    ///
    /// [`OtaError::InstallFailed`] carrying rauc's stderr; fatal for the
    /// current install attempt but never for the process.
    pub async fn install(&self, bundle: &Path) -> Result<(), OtaError> {
        info!(bundle = %bundle.display(), "installing bundle to inactive bank");
        self.run(&["install", &bundle.display().to_string()], BANK_INSTALL_TIMEOUT)
            .await
            .map_err(|e| OtaError::InstallFailed { message: e.to_string() })?;
        Ok(())
    }

    /// The appliance's own compatible string, read from the rauc system
    /// configuration under the system root.
    ///
    /// # Errors
    ///
    /// Fails when the system configuration is missing or carries no
    /// `compatible=` entry.
    pub async fn system_compatible(&self) -> Result<String, OtaError> {
        let path = self.sys_root.join("etc/rauc/system.conf");
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            OtaError::FileSystemError {
                operation: format!("reading {}", path.display()),
                source: e,
            }
        })?;
        text.lines()
            .map(str::trim)
            .find_map(|line| line.strip_prefix("compatible="))
            .map(|value| value.trim().to_string())
            .ok_or_else(|| OtaError::BankCommandError {
                reason: format!("no compatible entry in {}", path.display()),
            })
    }

    /// Verify a bundle targets this appliance before installing it.
    ///
    /// # Errors
    ///
    /// [`OtaError::InstallFailed`] with [`INCOMPATIBLE_MESSAGE`] on
    /// mismatch, so the exact text reaches the status channel.
    pub async fn check_compatible(&self, bundle: &Path) -> Result<BundleInfo, OtaError> {
        let bundle_info = self.info(bundle).await?;
        let system = self.system_compatible().await?;
        if bundle_info.compatible != system {
            return Err(OtaError::InstallFailed { message: INCOMPATIBLE_MESSAGE.to_string() });
        }
        Ok(bundle_info)
    }

    /// Decode the release descriptor embedded in bundle metadata.
    ///
    /// Offline installs synthesize their [`Release`] this way instead of
    /// any network call.
    ///
    /// # Errors
    ///
    /// [`OtaError::DescriptorDecode`] when the descriptor is absent or not
    /// valid base64-encoded YAML; a hard failure for the offline path.
    pub fn embedded_release(info: &BundleInfo) -> Result<Release, OtaError> {
        let encoded = info.release.as_deref().ok_or_else(|| OtaError::DescriptorDecode {
            reason: "bundle metadata carries no release descriptor".to_string(),
        })?;
        let decoded = BASE64.decode(encoded.trim()).map_err(|e| OtaError::DescriptorDecode {
            reason: format!("invalid base64: {e}"),
        })?;
        let yaml = String::from_utf8(decoded).map_err(|e| OtaError::DescriptorDecode {
            reason: format!("descriptor is not UTF-8: {e}"),
        })?;
        Release::from_yaml(&yaml)
            .map_err(|e| OtaError::DescriptorDecode { reason: e.to_string() })
    }

    /// Run rauc with `args`, returning captured stdout on success.
    async fn run(&self, args: &[&str], limit: Duration) -> Result<String, OtaError> {
        debug!(binary = %self.binary.display(), ?args, "running bank updater command");
        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        let output = timeout(limit, child)
            .await
            .map_err(|_| OtaError::BankCommandError {
                reason: format!("rauc {} timed out after {limit:?}", args.first().unwrap_or(&"")),
            })?
            .map_err(|e| OtaError::BankCommandError { reason: format!("spawn failed: {e}") })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(OtaError::BankCommandError {
                reason: if stderr.is_empty() { output.status.to_string() } else { stderr },
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
