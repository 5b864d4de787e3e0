//! Legacy archive-based update.
//!
//! Pre-bank appliances take a plain tarball release: fetch and download work
//! exactly as in the online path, but installation copies the extracted tree
//! directly onto the system root instead of going through the bank
//! subsystem. Completion records the new version so the next eligibility
//! check sees the upgrade applied.

use super::{StrategyCore, build_fetcher};
use crate::config::AgentConfig;
use crate::core::OtaError;
use crate::fetcher::ReleaseFetcher;
use crate::release::{Architecture, Release};
use crate::utils::copy_dir_all;
use std::path::{Path, PathBuf};
use tracing::info;

/// Direct-to-filesystem installation strategy for legacy targets.
pub struct ArchiveUpdate {
    core: StrategyCore,
    fetcher: ReleaseFetcher,
}

impl ArchiveUpdate {
    pub(crate) fn new(config: &AgentConfig, arch: Architecture) -> Self {
        Self { core: StrategyCore::new(config, arch), fetcher: build_fetcher(config) }
    }

    pub(crate) const fn core(&self) -> &StrategyCore {
        &self.core
    }

    pub async fn fetch_release(&self, tag: &str) -> Result<Release, OtaError> {
        if self.fetcher.last_good().is_none() {
            self.fetcher.restore_cached().await;
        }
        self.fetcher.fetch(tag).await
    }

    pub async fn verify_release(&self, release: &Release) -> Result<PathBuf, OtaError> {
        self.core.verify_downloaded(release).await
    }

    pub async fn download_release(
        &self,
        release: &Release,
        force: bool,
    ) -> Result<PathBuf, OtaError> {
        self.core.downloads.download_release(release, force).await
    }

    pub async fn extract_release(
        &self,
        artifact: &Path,
        release: &Release,
    ) -> Result<(), OtaError> {
        self.core.downloads.extract_release(artifact, release).await?;
        Ok(())
    }

    /// Overlay the extracted release tree onto the system root.
    pub async fn install(&self, release: &Release) -> Result<(), OtaError> {
        let extracted = self.core.extracted_dir(release);
        if !tokio::fs::try_exists(&extracted).await.unwrap_or(false) {
            return Err(OtaError::ArtifactNotFound { version: release.version.clone() });
        }
        info!(version = release.version, root = %self.core.sys_root.display(), "applying archive release");
        copy_dir_all(&extracted, &self.core.sys_root).await
    }

    /// Record the installed version so eligibility checks observe it.
    pub async fn post_install(&self, release: &Release) -> Result<(), OtaError> {
        let path = self.core.sys_root.join("etc/otad/VERSION");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &release.version).await?;
        info!(version = release.version, "archive release applied");
        Ok(())
    }
}
