//! Package download, verification, and extraction.
//!
//! For each mirror in a release's list, the manager fetches the checksum
//! manifest, resolves the architecture-specific package URL, skips the
//! download entirely when a previously fetched file already matches (unless
//! forced), and otherwise downloads and verifies the SHA-256 digest. A
//! verification failure discards the file and moves to the next mirror; only
//! after every mirror fails does the typed `PackageNotFound` error surface,
//! the one unrecoverable fetch error, since it means no package exists
//! anywhere.

pub mod checksum;
pub mod extract;

use crate::constants::{MIRROR_PLACEHOLDER, PACKAGE_DOWNLOAD_TIMEOUT};
use crate::core::OtaError;
use crate::release::{Architecture, Package, Release};
use crate::utils::{expand_url, file_name_from_url, join_url};
use checksum::ChecksumManifest;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Downloads and verifies release packages across mirrors.
pub struct DownloadManager {
    client: reqwest::Client,
    cache_root: PathBuf,
    arch: Architecture,
}

impl DownloadManager {
    /// Create a manager writing into `cache_root` for `arch` packages.
    ///
    /// # Panics
    ///
    /// Panics only if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new(cache_root: PathBuf, arch: Architecture) -> Self {
        let client = reqwest::Client::builder()
            .timeout(PACKAGE_DOWNLOAD_TIMEOUT)
            .build()
            .expect("HTTP client construction cannot fail with static configuration");
        Self { client, cache_root, arch }
    }

    /// The architecture packages are selected for.
    #[must_use]
    pub const fn arch(&self) -> Architecture {
        self.arch
    }

    /// Download and verify this release's package for the local architecture.
    ///
    /// Mirrors are tried sequentially; the first one whose manifest and
    /// package both check out wins. When `force` is false and the cached
    /// file already matches the manifest digest, no download happens.
    ///
    /// # Errors
    ///
    /// - [`OtaError::UnsupportedArchitecture`] if the release ships no
    ///   package for the local architecture,
    /// - [`OtaError::PackageNotFound`] after exhausting every mirror.
    pub async fn download_release(
        &self,
        release: &Release,
        force: bool,
    ) -> Result<PathBuf, OtaError> {
        let package = release.package_for(self.arch).ok_or(OtaError::UnsupportedArchitecture {
            arch: self.arch.as_str().to_string(),
        })?;
        let dir = release.cache_dir(&self.cache_root);
        tokio::fs::create_dir_all(&dir).await?;

        for mirror in &release.mirrors {
            match self.try_mirror(mirror, release, package, force, &dir).await {
                Ok(path) => {
                    info!(mirror, path = %path.display(), "package ready");
                    return Ok(path);
                }
                Err(e) => {
                    warn!(mirror, error = %e, "package download failed, trying next mirror");
                }
            }
        }
        Err(OtaError::PackageNotFound { version: release.version.clone() })
    }

    /// One mirror's full manifest-fetch / skip-check / download / verify
    /// cycle.
    async fn try_mirror(
        &self,
        mirror: &str,
        release: &Release,
        package: &Package,
        force: bool,
        dir: &Path,
    ) -> Result<PathBuf, OtaError> {
        let manifest_url = self.resolve_url(mirror, &release.checksums);
        let manifest_text =
            self.client.get(&manifest_url).send().await?.error_for_status()?.text().await?;
        let manifest = ChecksumManifest::parse(&manifest_text);

        let package_url = self.resolve_url(mirror, &package.path);
        let file_name = file_name_from_url(&package_url)?;
        let expected = manifest
            .digest_for(&file_name)
            .ok_or_else(|| OtaError::ChecksumMissing { file: file_name.clone() })?
            .to_string();
        let target = dir.join(&file_name);

        if !force && checksum::matches(&target, &expected).await {
            debug!(path = %target.display(), "cached package matches manifest, skipping download");
            checksum::write_sidecar(&target, &expected).await;
            return Ok(target);
        }

        self.download_to(&package_url, &target).await?;
        if let Err(e) = checksum::verify_file(&target, &expected).await {
            // Corrupt download: discard so a later skip-check cannot pick
            // it up.
            let _ = tokio::fs::remove_file(&target).await;
            return Err(e);
        }
        checksum::write_sidecar(&target, &expected).await;
        Ok(target)
    }

    /// Resolve a descriptor path against a mirror, honoring placeholder
    /// templates as well as plain relative paths.
    fn resolve_url(&self, mirror: &str, path: &str) -> String {
        if path.contains(MIRROR_PLACEHOLDER) {
            expand_url(path, mirror, self.arch)
        } else {
            join_url(mirror, &expand_url(path, mirror, self.arch))
        }
    }

    /// Stream a URL to `target`, writing through a `.partial` file so an
    /// interrupted download never masquerades as a complete one.
    ///
    /// # Errors
    ///
    /// Fails on HTTP errors or filesystem errors.
    pub async fn download_to(&self, url: &str, target: &Path) -> Result<(), OtaError> {
        debug!(url, target = %target.display(), "downloading");
        let response = self.client.get(url).send().await?.error_for_status()?;

        let partial = target.with_extension("partial");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, target).await?;
        Ok(())
    }

    /// Extract a verified package and expand its nested sub-packages.
    ///
    /// Returns the extraction root under the release's cache directory.
    ///
    /// # Errors
    ///
    /// Fails if the archive or any nested sub-package cannot be unpacked.
    pub async fn extract_release(
        &self,
        package: &Path,
        release: &Release,
    ) -> Result<PathBuf, OtaError> {
        let dest = release.cache_dir(&self.cache_root).join("extracted");
        extract::extract_archive(package, &dest).await?;
        extract::extract_nested(&dest).await?;
        Ok(dest)
    }

    /// Opportunistic background-image prefetch.
    ///
    /// Infallible by contract: failures are logged and never surfaced, and
    /// the orchestrator spawns this without awaiting it on the critical
    /// path.
    pub async fn prefetch_background(&self, release: &Release) {
        let Some(background) = release.background.clone() else {
            return;
        };
        let result: Result<(), OtaError> = async {
            let file_name = file_name_from_url(&background)?;
            let dir = release.cache_dir(&self.cache_root);
            tokio::fs::create_dir_all(&dir).await?;
            self.download_to(&background, &dir.join(file_name)).await
        }
        .await;
        if let Err(e) = result {
            debug!(url = background, error = %e, "background image prefetch failed");
        }
    }
}
