//! Tarball extraction, including the one-level nested sub-package sweep.

use crate::core::OtaError;
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Extract a gzipped tarball into `dest`, creating it as needed.
///
/// Runs on the blocking pool; tar entry paths are sanitized by the `tar`
/// crate's own `unpack` path checks.
///
/// # Errors
///
/// Fails on I/O errors or a corrupt archive.
pub async fn extract_archive(archive: &Path, dest: &Path) -> Result<(), OtaError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| OtaError::Other(format!("extraction task failed: {e}")))?
}

fn extract_blocking(archive: &Path, dest: &Path) -> Result<(), OtaError> {
    std::fs::create_dir_all(dest)?;
    let file = std::fs::File::open(archive).map_err(|e| OtaError::FileSystemError {
        operation: format!("opening archive {}", archive.display()),
        source: e,
    })?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.unpack(dest).map_err(|e| OtaError::FileSystemError {
        operation: format!("extracting {}", archive.display()),
        source: e,
    })?;
    debug!(archive = %archive.display(), dest = %dest.display(), "archive extracted");
    Ok(())
}

/// Expand nested sub-package archives one level deep.
///
/// Walks `dir` for `.tar.gz` files produced by the top-level extraction and
/// unpacks each into a sibling directory named after the archive stem.
/// Returns how many sub-packages were expanded. Archives created by this
/// pass are not revisited (single level of recursion by contract).
///
/// # Errors
///
/// Fails on the first sub-package that cannot be extracted.
pub async fn extract_nested(dir: &Path) -> Result<usize, OtaError> {
    let nested: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().to_string_lossy().ends_with(".tar.gz"))
        .map(|e| e.path().to_path_buf())
        .collect();

    let mut expanded = 0;
    for archive in nested {
        let dest = sibling_dir(&archive)?;
        extract_archive(&archive, &dest).await?;
        expanded += 1;
    }
    if expanded > 0 {
        info!(count = expanded, dir = %dir.display(), "expanded nested sub-packages");
    }
    Ok(expanded)
}

/// `foo/bar.tar.gz` → `foo/bar/`.
fn sibling_dir(archive: &Path) -> Result<PathBuf, OtaError> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_suffix(".tar.gz"))
        .ok_or_else(|| {
            OtaError::Other(format!("unexpected archive name: {}", archive.display()))
        })?;
    Ok(archive.with_file_name(name))
}
