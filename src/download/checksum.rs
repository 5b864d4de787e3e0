//! Checksum manifest parsing and SHA-256 file verification.
//!
//! Manifest format: one `<hex-digest> <filename>` entry per line, `#`-prefixed
//! comment lines ignored. Malformed lines are skipped with a warning rather
//! than failing the manifest, matching the best-effort parsing rule for list
//! files.

use crate::core::OtaError;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Parsed checksum manifest mapping file names to expected hex digests.
#[derive(Debug, Default)]
pub struct ChecksumManifest {
    entries: HashMap<String, String>,
}

impl ChecksumManifest {
    /// Parse manifest text, skipping comments and malformed lines.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut entries = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(digest), Some(file)) if is_hex_digest(digest) => {
                    entries.insert(file.to_string(), digest.to_ascii_lowercase());
                }
                _ => {
                    warn!(line, "skipping malformed checksum manifest line");
                }
            }
        }
        Self { entries }
    }

    /// Expected digest for `file`, if the manifest lists it.
    #[must_use]
    pub fn digest_for(&self, file: &str) -> Option<&str> {
        self.entries.get(file).map(String::as_str)
    }

    /// Number of usable entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no usable entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn is_hex_digest(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Compute the hex SHA-256 digest of a file, streaming so large bundles do
/// not occupy memory.
///
/// # Errors
///
/// Fails on any read error.
pub async fn compute_sha256(path: &Path) -> Result<String, OtaError> {
    let mut file = tokio::fs::File::open(path).await.map_err(|e| OtaError::FileSystemError {
        operation: format!("opening {} for hashing", path.display()),
        source: e,
    })?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a file against an expected hex digest (case-insensitive).
///
/// # Errors
///
/// [`OtaError::ChecksumMismatch`] when digests differ; the caller decides
/// whether to retry against another mirror.
pub async fn verify_file(path: &Path, expected: &str) -> Result<(), OtaError> {
    let actual = compute_sha256(path).await?;
    if actual != expected.to_ascii_lowercase() {
        return Err(OtaError::ChecksumMismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    debug!(path = %path.display(), "checksum verified");
    Ok(())
}

/// Whether an existing file already matches `expected`. Any error (missing
/// file, read failure) counts as non-matching.
pub async fn matches(path: &Path, expected: &str) -> bool {
    match compute_sha256(path).await {
        Ok(actual) => actual == expected.to_ascii_lowercase(),
        Err(_) => false,
    }
}

/// Path of the digest sidecar recorded next to a verified download.
#[must_use]
pub fn sidecar_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".sha256");
    path.with_file_name(name)
}

/// Record the manifest digest of a verified download so later verification
/// passes need no mirror round-trip.
pub async fn write_sidecar(path: &Path, digest: &str) {
    if let Err(e) = tokio::fs::write(sidecar_path(path), digest).await {
        warn!(path = %path.display(), error = %e, "failed to record digest sidecar");
    }
}

/// Re-verify a download against its recorded digest sidecar.
///
/// # Errors
///
/// [`OtaError::ChecksumMismatch`] on digest mismatch; a plain error when no
/// sidecar was recorded (the artifact was never verified).
pub async fn verify_against_sidecar(path: &Path) -> Result<(), OtaError> {
    let sidecar = sidecar_path(path);
    let expected = tokio::fs::read_to_string(&sidecar).await.map_err(|e| {
        OtaError::FileSystemError {
            operation: format!("reading digest sidecar {}", sidecar.display()),
            source: e,
        }
    })?;
    verify_file(path, expected.trim()).await
}
