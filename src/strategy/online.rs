//! Dual-bank update over the network.
//!
//! Fetches release metadata from mirrors, downloads and verifies the bundle
//! package, and delegates bundle installation and the compatibility check to
//! the external bank subsystem. The only state this variant leaves on the
//! system root is the pending-upgrade marker consumed on the next boot.

use super::{StrategyCore, build_fetcher, build_rauc, find_bundle};
use crate::bank::RaucClient;
use crate::config::AgentConfig;
use crate::constants::MIN_INSTALL_FREE_BYTES;
use crate::core::OtaError;
use crate::fetcher::ReleaseFetcher;
use crate::release::{Architecture, Release};
use std::path::{Path, PathBuf};
use tracing::info;

/// Online dual-bank installation strategy.
pub struct OnlineBankUpdate {
    core: StrategyCore,
    fetcher: ReleaseFetcher,
    rauc: RaucClient,
}

impl OnlineBankUpdate {
    pub(crate) fn new(config: &AgentConfig, arch: Architecture) -> Self {
        Self {
            core: StrategyCore::new(config, arch),
            fetcher: build_fetcher(config),
            rauc: build_rauc(config),
        }
    }

    pub(crate) const fn core(&self) -> &StrategyCore {
        &self.core
    }

    /// Network fetch with cached fallback; reloads the persisted descriptor
    /// on first use so the fallback survives restarts.
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

    /// Check free space, verify bundle compatibility, leave the pending
    /// marker, and hand the bundle to the bank subsystem.
    pub async fn install(&self, release: &Release) -> Result<(), OtaError> {
        tokio::fs::create_dir_all(&self.core.cache_root).await?;
        let available = fs4::available_space(&self.core.cache_root)?;
        if available < MIN_INSTALL_FREE_BYTES {
            return Err(OtaError::InsufficientSpace {
                available,
                required: MIN_INSTALL_FREE_BYTES,
            });
        }

        let bundle = find_bundle(&self.core.extracted_dir(release))?;
        self.rauc.check_compatible(&bundle).await?;

        self.core.write_pending_marker(release).await?;
        if let Err(e) = self.rauc.install(&bundle).await {
            // A failed install leaves nothing pending for the next boot.
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::DeploymentMode;
    use crate::test_utils::tar_gz;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

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
            mode: DeploymentMode::OnlineBank,
            rauc_binary: Some(rauc),
            ..AgentConfig::default()
        }
    }

    fn release() -> Release {
        Release::from_yaml(
            "version: v0.4.9\n\
             mirrors: [\"https://m.example.com/\"]\n\
             packages:\n\
             \x20 - path: get/v0.4.9/appliance-amd64.tar.gz\n\
             \x20   architecture: amd64\n",
        )
        .unwrap()
    }

    fn stage_extracted_bundle(strategy: &OnlineBankUpdate, release: &Release) {
        let dir = strategy.core().extracted_dir(release);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("appliance-v0.4.9.raucb"), b"opaque bundle").unwrap();
    }

    #[tokio::test]
    async fn test_install_happy_path_leaves_pending_marker() {
        let tmp = TempDir::new().unwrap();
        let config = config(
            &tmp,
            r#"case "$1" in info) echo '{"compatible":"appliance-v2","version":"0.4.9"}';; esac"#,
        );
        let strategy = OnlineBankUpdate::new(&config, Architecture::Amd64);
        let release = release();
        stage_extracted_bundle(&strategy, &release);

        strategy.install(&release).await.unwrap();
        let marker = strategy.core().pending_marker();
        assert_eq!(std::fs::read_to_string(marker).unwrap(), "v0.4.9");

        strategy.post_install(&release).await.unwrap();
    }

    #[tokio::test]
    async fn test_incompatible_bundle_fails_with_exact_message() {
        let tmp = TempDir::new().unwrap();
        let config = config(
            &tmp,
            r#"case "$1" in info) echo '{"compatible":"other-hardware","version":"0.4.9"}';; esac"#,
        );
        let strategy = OnlineBankUpdate::new(&config, Architecture::Amd64);
        let release = release();
        stage_extracted_bundle(&strategy, &release);

        let err = strategy.install(&release).await.unwrap_err();
        assert_eq!(err.to_string(), "rauc is not compatible");
        assert!(!strategy.core().pending_marker().exists());
    }

    #[tokio::test]
    async fn test_failed_install_clears_pending_marker() {
        let tmp = TempDir::new().unwrap();
        let config = config(
            &tmp,
            r#"case "$1" in
info) echo '{"compatible":"appliance-v2","version":"0.4.9"}';;
install) echo 'bank write failed' >&2; exit 1;;
esac"#,
        );
        let strategy = OnlineBankUpdate::new(&config, Architecture::Amd64);
        let release = release();
        stage_extracted_bundle(&strategy, &release);

        let err = strategy.install(&release).await.unwrap_err();
        assert!(err.to_string().contains("bank write failed"));
        assert!(!strategy.core().pending_marker().exists());
    }

    #[tokio::test]
    async fn test_install_without_extracted_bundle_fails() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "exit 0");
        let strategy = OnlineBankUpdate::new(&config, Architecture::Amd64);
        assert!(strategy.install(&release()).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_release_requires_downloaded_artifact() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "exit 0");
        let strategy = OnlineBankUpdate::new(&config, Architecture::Amd64);
        assert!(matches!(
            strategy.verify_release(&release()).await,
            Err(OtaError::ArtifactNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_verify_release_caches_positive_result() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, "exit 0");
        let strategy = OnlineBankUpdate::new(&config, Architecture::Amd64);
        let release = release();

        // Stage a verified artifact the way a download would leave it.
        let dir = release.cache_dir(&config.cache_dir);
        std::fs::create_dir_all(&dir).unwrap();
        let package = tar_gz(&[("x", b"y")]);
        std::fs::write(dir.join("appliance-amd64.tar.gz"), &package).unwrap();
        std::fs::write(
            dir.join("appliance-amd64.tar.gz.sha256"),
            crate::test_utils::sha256_hex(&package),
        )
        .unwrap();

        let first = strategy.verify_release(&release).await.unwrap();

        // Corrupt the file: the cached positive result must still answer.
        std::fs::write(dir.join("appliance-amd64.tar.gz"), b"tampered").unwrap();
        let second = strategy.verify_release(&release).await.unwrap();
        assert_eq!(first, second);
    }
}
