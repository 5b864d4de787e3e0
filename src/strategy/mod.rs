//! Installation strategies behind one uniform capability surface.
//!
//! Three mutually incompatible update mechanisms hide behind a closed enum:
//!
//! - [`OnlineBankUpdate`]: fetch metadata over the network, download and
//!   verify the dual-bank bundle, delegate installation to the external
//!   bank subsystem.
//! - [`OfflineBankUpdate`]: the bundle is pre-staged on local storage; its
//!   embedded descriptor replaces any network fetch.
//! - [`ArchiveUpdate`]: legacy plain-tarball release applied by direct
//!   filesystem installation.
//!
//! Callers never know which variant is active except through construction:
//! [`UpdateStrategy::construct`] picks the variant once at startup from the
//! configured deployment mode, and every call site goes through the enum's
//! uniform methods.

pub mod archive;
pub mod offline;
pub mod online;

pub use archive::ArchiveUpdate;
pub use offline::OfflineBankUpdate;
pub use online::OnlineBankUpdate;

use crate::bank::RaucClient;
use crate::config::AgentConfig;
use crate::constants::UPGRADE_PENDING_MARKER;
use crate::core::OtaError;
use crate::download::{DownloadManager, checksum};
use crate::fetcher::ReleaseFetcher;
use crate::migration::{MigrationTool, MigrationToolResolver};
use crate::release::{Architecture, Release};
use crate::utils::file_name_from_url;
use crate::version::{self, Version, is_newer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Deployment mode selecting which strategy is constructed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Dual-bank appliance with network access.
    OnlineBank,
    /// Dual-bank appliance updated from pre-staged local storage.
    OfflineBank,
    /// Legacy archive-based target.
    Archive,
}

/// The closed set of installation strategies.
///
/// All capability methods dispatch to the active variant; the three
/// variants are substitutable behind every call site.
pub enum UpdateStrategy {
    /// Dual-bank update over the network.
    OnlineBank(OnlineBankUpdate),
    /// Dual-bank update from a pre-staged bundle.
    OfflineBank(OfflineBankUpdate),
    /// Legacy archive update.
    Archive(ArchiveUpdate),
}

impl UpdateStrategy {
    /// Build the strategy for the configured deployment mode.
    ///
    /// # Errors
    ///
    /// Fails when the local architecture is unsupported.
    pub fn construct(config: &AgentConfig) -> Result<Self, OtaError> {
        let arch = Architecture::detect()?;
        Ok(match config.mode {
            DeploymentMode::OnlineBank => Self::OnlineBank(OnlineBankUpdate::new(config, arch)),
            DeploymentMode::OfflineBank => Self::OfflineBank(OfflineBankUpdate::new(config, arch)),
            DeploymentMode::Archive => Self::Archive(ArchiveUpdate::new(config, arch)),
        })
    }

    /// Retrieve the release descriptor for `tag`.
    pub async fn fetch_release(&self, tag: &str) -> Result<Release, OtaError> {
        match self {
            Self::OnlineBank(s) => s.fetch_release(tag).await,
            Self::OfflineBank(s) => s.fetch_release(tag).await,
            Self::Archive(s) => s.fetch_release(tag).await,
        }
    }

    /// Locate and validate a previously downloaded or staged artifact.
    ///
    /// Idempotent: a positive result is cached for the current release so
    /// repeated calls do not re-hash large artifacts.
    pub async fn verify_release(&self, release: &Release) -> Result<PathBuf, OtaError> {
        match self {
            Self::OnlineBank(s) => s.verify_release(release).await,
            Self::OfflineBank(s) => s.verify_release(release).await,
            Self::Archive(s) => s.verify_release(release).await,
        }
    }

    /// Obtain the release artifact (download or staged copy).
    pub async fn download_release(
        &self,
        release: &Release,
        force: bool,
    ) -> Result<PathBuf, OtaError> {
        match self {
            Self::OnlineBank(s) => s.download_release(release, force).await,
            Self::OfflineBank(s) => s.download_release(release, force).await,
            Self::Archive(s) => s.download_release(release, force).await,
        }
    }

    /// Unpack the artifact where the mechanism requires it.
    pub async fn extract_release(
        &self,
        artifact: &Path,
        release: &Release,
    ) -> Result<(), OtaError> {
        match self {
            Self::OnlineBank(s) => s.extract_release(artifact, release).await,
            Self::OfflineBank(s) => s.extract_release(artifact, release).await,
            Self::Archive(s) => s.extract_release(artifact, release).await,
        }
    }

    /// Apply the release through the mechanism-specific path.
    pub async fn install(&self, release: &Release) -> Result<(), OtaError> {
        match self {
            Self::OnlineBank(s) => s.install(release).await,
            Self::OfflineBank(s) => s.install(release).await,
            Self::Archive(s) => s.install(release).await,
        }
    }

    /// Mechanism-specific completion work after a successful install.
    pub async fn post_install(&self, release: &Release) -> Result<(), OtaError> {
        match self {
            Self::OnlineBank(s) => s.post_install(release).await,
            Self::OfflineBank(s) => s.post_install(release).await,
            Self::Archive(s) => s.post_install(release).await,
        }
    }

    /// Whether the release outranks the installed version.
    pub async fn should_upgrade(&self, release: &Release) -> bool {
        match self {
            Self::OnlineBank(s) => s.core().should_upgrade(release).await,
            Self::OfflineBank(s) => s.core().should_upgrade(release).await,
            Self::Archive(s) => s.core().should_upgrade(release).await,
        }
    }

    /// Like [`Self::should_upgrade`], additionally requiring a verified
    /// artifact to already be available.
    pub async fn is_upgradable(&self, release: &Release) -> bool {
        if !self.should_upgrade(release).await {
            return false;
        }
        self.verify_release(release).await.is_ok()
    }

    /// Clear the pending-upgrade marker left by a prior boot. Idempotent; a
    /// no-op when the marker is absent.
    pub async fn migration_in_launch(&self) -> Result<(), OtaError> {
        match self {
            Self::OnlineBank(s) => s.core().clear_pending_marker().await,
            Self::OfflineBank(s) => s.core().clear_pending_marker().await,
            // Archive targets never leave a bank marker.
            Self::Archive(_) => Ok(()),
        }
    }

    /// The per-module migration tool chains for this release.
    pub async fn migration_info(
        &self,
        release: &Release,
    ) -> Result<HashMap<String, Vec<MigrationTool>>, OtaError> {
        match self {
            Self::OnlineBank(s) => s.core().migration_info(release).await,
            Self::OfflineBank(s) => s.core().migration_info(release).await,
            Self::Archive(s) => s.core().migration_info(release).await,
        }
    }

    /// Download every migration tool the planned chains require.
    pub async fn download_all_migration_tools(
        &self,
        release: &Release,
    ) -> Result<Vec<PathBuf>, OtaError> {
        match self {
            Self::OnlineBank(s) => s.core().download_all_migration_tools(release).await,
            Self::OfflineBank(s) => s.core().download_all_migration_tools(release).await,
            Self::Archive(s) => s.core().download_all_migration_tools(release).await,
        }
    }

    /// Final cleanup once migration has completed.
    pub async fn post_migration(&self, release: &Release) -> Result<(), OtaError> {
        match self {
            Self::OnlineBank(s) => s.core().post_migration(release).await,
            Self::OfflineBank(s) => s.core().post_migration(release).await,
            Self::Archive(s) => s.core().post_migration(release).await,
        }
    }

    /// The download manager of the active variant, used for opportunistic
    /// prefetching outside the install path.
    #[must_use]
    pub fn downloads(&self) -> &DownloadManager {
        match self {
            Self::OnlineBank(s) => &s.core().downloads,
            Self::OfflineBank(s) => &s.core().downloads,
            Self::Archive(s) => &s.core().downloads,
        }
    }
}

/// State and behavior shared by every strategy variant.
pub(crate) struct StrategyCore {
    pub(crate) cache_root: PathBuf,
    pub(crate) sys_root: PathBuf,
    pub(crate) arch: Architecture,
    pub(crate) downloads: DownloadManager,
    // verify_release idempotence: version -> verified artifact path.
    verified: Mutex<Option<(String, PathBuf)>>,
}

impl StrategyCore {
    pub(crate) fn new(config: &AgentConfig, arch: Architecture) -> Self {
        Self {
            cache_root: config.cache_dir.clone(),
            sys_root: config.sys_root.clone(),
            arch,
            downloads: DownloadManager::new(config.cache_dir.clone(), arch),
            verified: Mutex::new(None),
        }
    }

    /// The currently installed version, read from the version file under
    /// the system root. An absent file means a pre-versioning appliance and
    /// maps to the legacy sentinel, which loses to every real version.
    pub(crate) async fn installed_version(&self) -> Result<Version, OtaError> {
        let path = self.sys_root.join("etc/otad/VERSION");
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => version::normalize(text.trim()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                version::normalize(crate::constants::LEGACY_WITHOUT_VERSION)
            }
            Err(e) => Err(OtaError::FileSystemError {
                operation: format!("reading {}", path.display()),
                source: e,
            }),
        }
    }

    /// Upgrade-eligibility check against the installed version. Errors
    /// (unparseable versions) are logged and answered with `false` so a bad
    /// descriptor can never trigger an install.
    pub(crate) async fn should_upgrade(&self, release: &Release) -> bool {
        let target = match release.target_version() {
            Ok(v) => v,
            Err(e) => {
                warn!(version = release.version, error = %e, "unparseable target version");
                return false;
            }
        };
        let installed = match self.installed_version().await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "cannot determine installed version");
                return false;
            }
        };
        is_newer(&installed, &target)
    }

    /// Positive verification cache lookup.
    pub(crate) fn cached_verified(&self, release: &Release) -> Option<PathBuf> {
        let slot = self.verified.lock().expect("verification cache lock poisoned");
        slot.as_ref().filter(|(v, _)| *v == release.version).map(|(_, p)| p.clone())
    }

    /// Record a positive verification for the current release.
    pub(crate) fn remember_verified(&self, release: &Release, artifact: &Path) {
        *self.verified.lock().expect("verification cache lock poisoned") =
            Some((release.version.clone(), artifact.to_path_buf()));
    }

    /// Expected artifact path in the release cache directory.
    pub(crate) fn artifact_path(&self, release: &Release) -> Result<PathBuf, OtaError> {
        let package = release.package_for(self.arch).ok_or(OtaError::UnsupportedArchitecture {
            arch: self.arch.as_str().to_string(),
        })?;
        let file_name = file_name_from_url(&package.path)?;
        Ok(release.cache_dir(&self.cache_root).join(file_name))
    }

    /// Re-verify a downloaded artifact against its recorded digest,
    /// caching the positive result.
    pub(crate) async fn verify_downloaded(&self, release: &Release) -> Result<PathBuf, OtaError> {
        if let Some(artifact) = self.cached_verified(release) {
            return Ok(artifact);
        }
        let artifact = self.artifact_path(release)?;
        if !tokio::fs::try_exists(&artifact).await.unwrap_or(false) {
            return Err(OtaError::ArtifactNotFound { version: release.version.clone() });
        }
        checksum::verify_against_sidecar(&artifact).await?;
        self.remember_verified(release, &artifact);
        Ok(artifact)
    }

    /// Extraction root for a release.
    pub(crate) fn extracted_dir(&self, release: &Release) -> PathBuf {
        release.cache_dir(&self.cache_root).join("extracted")
    }

    /// Migration resolver over the list files shipped in the extracted
    /// release tree.
    pub(crate) fn migration_resolver(&self, release: &Release) -> MigrationToolResolver {
        MigrationToolResolver::new(self.extracted_dir(release).join("migrations"))
    }

    /// Per-module tool chains windowed to the installed→target gap.
    pub(crate) async fn migration_info(
        &self,
        release: &Release,
    ) -> Result<HashMap<String, Vec<MigrationTool>>, OtaError> {
        let installed = self.installed_version().await?;
        let target = release.target_version()?;
        let resolver = self.migration_resolver(release);
        let mut plans = HashMap::new();
        for module in &release.modules {
            let plan = resolver.plan(module, &installed, &target).await?;
            if !plan.is_empty() {
                debug!(module = module.short, tools = plan.len(), "migration plan");
                plans.insert(module.short.clone(), plan);
            }
        }
        Ok(plans)
    }

    /// Download every planned migration tool into the release cache.
    pub(crate) async fn download_all_migration_tools(
        &self,
        release: &Release,
    ) -> Result<Vec<PathBuf>, OtaError> {
        let plans = self.migration_info(release).await?;
        let dest = release.cache_dir(&self.cache_root).join("migration-tools");
        self.migration_resolver(release)
            .download_all(&self.downloads, release, &plans, &dest)
            .await
    }

    /// Drop per-release working state after migration completes.
    pub(crate) async fn post_migration(&self, release: &Release) -> Result<(), OtaError> {
        let tools = release.cache_dir(&self.cache_root).join("migration-tools");
        if tokio::fs::try_exists(&tools).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&tools).await?;
        }
        info!(version = release.version, "migration complete");
        Ok(())
    }

    /// Absolute path of the pending-upgrade marker.
    pub(crate) fn pending_marker(&self) -> PathBuf {
        self.sys_root.join(UPGRADE_PENDING_MARKER)
    }

    /// Leave the pending-upgrade marker for the post-reboot launch.
    pub(crate) async fn write_pending_marker(&self, release: &Release) -> Result<(), OtaError> {
        let marker = self.pending_marker();
        if let Some(parent) = marker.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&marker, &release.version).await?;
        Ok(())
    }

    /// Remove the pending-upgrade marker; a no-op when absent.
    pub(crate) async fn clear_pending_marker(&self) -> Result<(), OtaError> {
        let marker = self.pending_marker();
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => {
                info!(marker = %marker.display(), "cleared pending-upgrade marker");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(OtaError::FileSystemError {
                operation: format!("removing {}", marker.display()),
                source: e,
            }),
        }
    }
}

/// Locate the bank bundle inside an extracted release tree.
pub(crate) fn find_bundle(dir: &Path) -> Result<PathBuf, OtaError> {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| {
            e.file_type().is_file()
                && e.path().extension().is_some_and(|ext| ext == "raucb")
        })
        .map(|e| e.path().to_path_buf())
        .ok_or_else(|| OtaError::Other(format!("no bundle found under {}", dir.display())))
}

/// Build the fetcher a network-backed strategy uses.
pub(crate) fn build_fetcher(config: &AgentConfig) -> ReleaseFetcher {
    ReleaseFetcher::new(config.mirrors.clone(), config.cache_dir.clone())
}

/// Build the bank client for a dual-bank strategy.
pub(crate) fn build_rauc(config: &AgentConfig) -> RaucClient {
    let client = RaucClient::new(config.sys_root.clone());
    match &config.rauc_binary {
        Some(binary) => client.with_binary(binary),
        None => client,
    }
}
