//! Dual-bank update from a pre-staged bundle.
//!
//! Air-gapped appliances receive the bundle out of band (USB stick,
//! provisioning step) at a fixed path under the system root. The release
//! descriptor is decoded from the bundle's own metadata, so this variant
//! never touches the network; the "download" is a local copy into the
//! release cache and extraction is a no-op because the bundle stays opaque.

use super::{StrategyCore, build_rauc};
use crate::bank::RaucClient;
use crate::config::AgentConfig;
use crate::constants::OFFLINE_BUNDLE_PATH;
use crate::core::OtaError;
use crate::release::{Architecture, Release};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Offline dual-bank installation strategy.
pub struct OfflineBankUpdate {
    core: StrategyCore,
    rauc: RaucClient,
    /// Fixed staging location the bundle is provisioned to.
    staged: PathBuf,
    // Decoded descriptor, cached after the first rauc info round-trip.
    descriptor: Mutex<Option<Release>>,
}

impl OfflineBankUpdate {
    pub(crate) fn new(config: &AgentConfig, arch: Architecture) -> Self {
        Self {
            core: StrategyCore::new(config, arch),
            rauc: build_rauc(config),
            staged: config.sys_root.join(OFFLINE_BUNDLE_PATH),
            descriptor: Mutex::new(None),
        }
    }

    pub(crate) const fn core(&self) -> &StrategyCore {
        &self.core
    }

    /// Decode the release descriptor embedded in the staged bundle. The tag
    /// is ignored: whatever was provisioned is the only release available.
    ///
    /// # Errors
    ///
    /// [`OtaError::BundleNotFound`] when nothing is staged,
    /// [`OtaError::DescriptorDecode`] when the bundle carries no usable
    /// descriptor.
    pub async fn fetch_release(&self, _tag: &str) -> Result<Release, OtaError> {
        if let Some(release) = self.cached_descriptor() {
            return Ok(release);
        }
        if !tokio::fs::try_exists(&self.staged).await.unwrap_or(false) {
            return Err(OtaError::BundleNotFound { path: self.staged.clone() });
        }
        let bundle_info = self.rauc.info(&self.staged).await?;
        let release = RaucClient::embedded_release(&bundle_info)?;
        info!(version = release.version, "decoded release descriptor from staged bundle");
        *self.descriptor.lock().expect("descriptor cache lock poisoned") = Some(release.clone());
        Ok(release)
    }

    /// Confirm the bundle copy (staged or cached) is a readable bundle.
    pub async fn verify_release(&self, release: &Release) -> Result<PathBuf, OtaError> {
        if let Some(artifact) = self.core.cached_verified(release) {
            return Ok(artifact);
        }
        let bundle = self.bundle_location(release).await?;
        self.rauc.info(&bundle).await?;
        self.core.remember_verified(release, &bundle);
        Ok(bundle)
    }

    /// Copy the staged bundle into the release cache so a later wipe of the
    /// staging area cannot strand an install in progress.
    pub async fn download_release(
        &self,
        release: &Release,
        force: bool,
    ) -> Result<PathBuf, OtaError> {
        let target = self.cached_bundle_path(release);
        if !force && tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(path = %target.display(), "bundle already cached");
            return Ok(target);
        }
        if !tokio::fs::try_exists(&self.staged).await.unwrap_or(false) {
            return Err(OtaError::BundleNotFound { path: self.staged.clone() });
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&self.staged, &target).await?;
        info!(path = %target.display(), "staged bundle copied into release cache");
        Ok(target)
    }

    /// Bundles stay opaque; there is nothing to unpack.
    pub async fn extract_release(
        &self,
        _artifact: &Path,
        _release: &Release,
    ) -> Result<(), OtaError> {
        Ok(())
    }

    /// Compatibility-check the bundle, leave the pending marker, and hand
    /// it to the bank subsystem.
    pub async fn install(&self, release: &Release) -> Result<(), OtaError> {
        let bundle = self.bundle_location(release).await?;
        self.rauc.check_compatible(&bundle).await?;

        self.core.write_pending_marker(release).await?;
        if let Err(e) = self.rauc.install(&bundle).await {
            let _ = self.core.clear_pending_marker().await;
            return Err(e);
        }
        Ok(())
    }

    /// The new bank activates on reboot; nothing to apply here.
    pub async fn post_install(&self, release: &Release) -> Result<(), OtaError> {
        info!(version = release.version, "bundle installed to inactive bank, reboot to activate");
        Ok(())
    }

    fn cached_descriptor(&self) -> Option<Release> {
        self.descriptor.lock().expect("descriptor cache lock poisoned").clone()
    }

    fn cached_bundle_path(&self, release: &Release) -> PathBuf {
        let name = self.staged.file_name().map_or_else(
            || std::ffi::OsString::from("bundle.raucb"),
            std::ffi::OsStr::to_os_string,
        );
        release.cache_dir(&self.core.cache_root).join(name)
    }

    /// The cached copy when present, otherwise the staging location.
    async fn bundle_location(&self, release: &Release) -> Result<PathBuf, OtaError> {
        let cached = self.cached_bundle_path(release);
        if tokio::fs::try_exists(&cached).await.unwrap_or(false) {
            return Ok(cached);
        }
        if tokio::fs::try_exists(&self.staged).await.unwrap_or(false) {
            return Ok(self.staged.clone());
        }
        Err(OtaError::BundleNotFound { path: self.staged.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::DeploymentMode;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    const DESCRIPTOR_YAML: &str = "version: v0.5.0\nmirrors: []\n";

    fn config(tmp: &TempDir, rauc_script: &str) -> AgentConfig {
        let rauc = tmp.path().join("rauc");
        std::fs::write(&rauc, format!("#!/bin/sh\n{rauc_script}\n")).unwrap();
        std::fs::set_permissions(&rauc, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sys_root = tmp.path().join("sysroot");
        std::fs::create_dir_all(sys_root.join("etc/rauc")).unwrap();
        std::fs::write(
            sys_root.join("etc/rauc/system.conf"),
            "[system]\ncompatible=appliance-v2\n",
        )
        .unwrap();

        AgentConfig {
            cache_dir: tmp.path().join("cache"),
            sys_root,
            mode: DeploymentMode::OfflineBank,
            rauc_binary: Some(rauc),
            ..AgentConfig::default()
        }
    }

    fn info_script() -> String {
        format!(
            r#"case "$1" in info) echo '{{"compatible":"appliance-v2","version":"0.5.0","release":"{}"}}';; esac"#,
            BASE64.encode(DESCRIPTOR_YAML)
        )
    }

    fn stage_bundle(config: &AgentConfig) {
        let staged = config.sys_root.join(OFFLINE_BUNDLE_PATH);
        std::fs::create_dir_all(staged.parent().unwrap()).unwrap();
        std::fs::write(staged, b"opaque bundle bytes").unwrap();
    }

    #[tokio::test]
    async fn test_fetch_decodes_embedded_descriptor_once() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, &info_script());
        stage_bundle(&config);
        let strategy = OfflineBankUpdate::new(&config, Architecture::Amd64);

        let release = strategy.fetch_release("latest").await.unwrap();
        assert_eq!(release.version, "v0.5.0");

        // Second fetch answers from the cache even if the stub is removed.
        std::fs::remove_file(config.rauc_binary.as_ref().unwrap()).unwrap();
        let again = strategy.fetch_release("latest").await.unwrap();
        assert_eq!(again.version, "v0.5.0");
    }

    #[tokio::test]
    async fn test_missing_staged_bundle_is_bundle_not_found() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, &info_script());
        let strategy = OfflineBankUpdate::new(&config, Architecture::Amd64);
        assert!(matches!(
            strategy.fetch_release("latest").await,
            Err(OtaError::BundleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_bundle_without_descriptor_is_decode_error() {
        let tmp = TempDir::new().unwrap();
        let config = config(
            &tmp,
            r#"case "$1" in info) echo '{"compatible":"appliance-v2","version":"0.5.0"}';; esac"#,
        );
        stage_bundle(&config);
        let strategy = OfflineBankUpdate::new(&config, Architecture::Amd64);
        assert!(matches!(
            strategy.fetch_release("latest").await,
            Err(OtaError::DescriptorDecode { .. })
        ));
    }

    #[tokio::test]
    async fn test_download_copies_into_cache_idempotently() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, &info_script());
        stage_bundle(&config);
        let strategy = OfflineBankUpdate::new(&config, Architecture::Amd64);
        let release = strategy.fetch_release("latest").await.unwrap();

        let cached = strategy.download_release(&release, false).await.unwrap();
        assert_eq!(std::fs::read(&cached).unwrap(), b"opaque bundle bytes");

        // Staging area wiped; the cached copy still satisfies the call.
        std::fs::remove_file(config.sys_root.join(OFFLINE_BUNDLE_PATH)).unwrap();
        let again = strategy.download_release(&release, false).await.unwrap();
        assert_eq!(again, cached);
    }

    #[tokio::test]
    async fn test_full_offline_install() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, &info_script());
        stage_bundle(&config);
        let strategy = OfflineBankUpdate::new(&config, Architecture::Amd64);

        let release = strategy.fetch_release("latest").await.unwrap();
        let artifact = strategy.download_release(&release, false).await.unwrap();
        strategy.verify_release(&release).await.unwrap();
        strategy.extract_release(&artifact, &release).await.unwrap();
        strategy.install(&release).await.unwrap();

        let marker = strategy.core().pending_marker();
        assert_eq!(std::fs::read_to_string(marker).unwrap(), "v0.5.0");
    }
}
