//! Small cross-cutting helpers: URL assembly, placeholder substitution, and
//! recursive filesystem copies.

use crate::constants::{ARCH_PLACEHOLDER, MIRROR_PLACEHOLDER};
use crate::core::OtaError;
use crate::release::Architecture;
use std::path::Path;
use walkdir::WalkDir;

/// Join a mirror base URL and a relative path without doubling slashes.
///
/// Absolute `http(s)` paths pass through untouched so descriptors can point
/// at out-of-tree artifacts.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Substitute the mirror and architecture placeholders in a URL template.
#[must_use]
pub fn expand_url(template: &str, mirror: &str, arch: Architecture) -> String {
    template
        .replace(MIRROR_PLACEHOLDER, mirror.trim_end_matches('/'))
        .replace(ARCH_PLACEHOLDER, arch.as_str())
}

/// Last path segment of a URL, used to name downloaded files in the cache.
///
/// # Errors
///
/// Fails when the URL has no usable final segment.
pub fn file_name_from_url(url: &str) -> Result<String, OtaError> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        // A ':' in the segment means the split landed in the scheme or
        // authority of a path-less URL, not on a file name.
        .filter(|name| !name.is_empty() && !name.contains(':'))
        .map(|name| name.split('?').next().unwrap_or(name).to_string())
        .ok_or_else(|| OtaError::Other(format!("cannot derive file name from URL '{url}'")))
}

/// Recursively copy a directory tree, preserving relative layout.
///
/// Used by the archive strategy to apply an extracted release onto the
/// system root and by the offline strategy to stage the bundle into the
/// cache.
///
/// # Errors
///
/// Fails on the first filesystem error with the offending operation named.
pub async fn copy_dir_all(src: &Path, dst: &Path) -> Result<(), OtaError> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| OtaError::Other(format!("walking {}: {e}", src.display())))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| OtaError::Other(format!("path outside copy root: {e}")))?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            tokio::fs::create_dir_all(&target).await.map_err(|e| OtaError::FileSystemError {
                operation: format!("creating {}", target.display()),
                source: e,
            })?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(entry.path(), &target).await.map_err(|e| {
                OtaError::FileSystemError {
                    operation: format!("copying to {}", target.display()),
                    source: e,
                }
            })?;
        }
        // Symlinks inside release trees are not expected; skip anything else.
    }
    Ok(())
}
