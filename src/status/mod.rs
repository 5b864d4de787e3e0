//! Observable update status.
//!
//! [`StatusTracker`] wraps the active [`UpdateStrategy`] and publishes a
//! coarse phase plus a short message across every operation, so the CLI and
//! any future status consumer see one consistent lifecycle:
//!
//! ```text
//! Idle -> FetchUpdating -> Idle -> Downloading -> Idle -> Installing -> Idle
//!                                                             \-> InstallError
//! ```
//!
//! The status lock is a plain `RwLock` held only for the copy in or out,
//! never across an await. A separate single-slot gate serializes installs:
//! a second trigger while one runs is answered with `InstallInProgress`
//! instead of queueing.

use crate::core::OtaError;
use crate::release::Release;
use crate::strategy::UpdateStrategy;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{info, warn};

/// Idle-phase message: nothing newer than the installed version.
pub const MSG_UP_TO_DATE: &str = "up-to-date";
/// Idle-phase message: a newer release is downloaded and verified.
pub const MSG_READY_TO_UPDATE: &str = "ready-to-update";
/// Idle-phase message: a newer release exists but is not yet downloaded.
pub const MSG_OUT_OF_DATE: &str = "out-of-date";
/// Installing-phase message while the artifact is unpacked.
pub const MSG_DECOMPRESS: &str = "decompress";
/// Installing-phase message while the mechanism applies the release.
pub const MSG_INSTALLING: &str = "installing";
/// Installing-phase message during post-install completion.
pub const MSG_RESTARTING: &str = "restarting";
/// Installing-phase message while migration tools are handled.
pub const MSG_MIGRATION: &str = "migration";

/// Coarse lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    /// No operation in flight.
    Idle,
    /// A release descriptor fetch is in flight.
    FetchUpdating,
    /// A package download is in flight.
    Downloading,
    /// An install cycle is in flight.
    Installing,
    /// The last install cycle failed; the message carries the error.
    InstallError,
}

/// A phase and its human-readable message, copied out atomically.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub phase: Phase,
    pub message: String,
}

impl Status {
    fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self { phase, message: message.into() }
    }
}

/// Status-publishing decorator over the active strategy.
pub struct StatusTracker {
    strategy: UpdateStrategy,
    status: RwLock<Status>,
    // Single-slot install gate: try_lock failure means a cycle is running.
    install_gate: tokio::sync::Mutex<()>,
}

impl StatusTracker {
    #[must_use]
    pub fn new(strategy: UpdateStrategy) -> Self {
        Self {
            strategy,
            status: RwLock::new(Status::new(Phase::Idle, MSG_UP_TO_DATE)),
            install_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Snapshot of the current phase and message.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.read().expect("status lock poisoned").clone()
    }

    /// The wrapped strategy, for operations that carry no status semantics.
    #[must_use]
    pub const fn strategy(&self) -> &UpdateStrategy {
        &self.strategy
    }

    fn set(&self, phase: Phase, message: impl Into<String>) {
        *self.status.write().expect("status lock poisoned") = Status::new(phase, message);
    }

    /// Fetch the release descriptor, ending Idle with the eligibility
    /// verdict as message. A failed fetch returns to Idle with the previous
    /// message intact.
    ///
    /// # Errors
    ///
    /// Propagates the strategy's fetch error.
    pub async fn fetch_release(&self, tag: &str) -> Result<Release, OtaError> {
        let previous = self.status().message;
        self.set(Phase::FetchUpdating, "checking for updates");
        match self.strategy.fetch_release(tag).await {
            Ok(release) => {
                let message = self.eligibility_message(&release).await;
                self.set(Phase::Idle, message);
                Ok(release)
            }
            Err(e) => {
                self.set(Phase::Idle, previous);
                Err(e)
            }
        }
    }

    /// Download the release artifact under the Downloading phase.
    ///
    /// # Errors
    ///
    /// Propagates the strategy's download error.
    pub async fn download_release(
        &self,
        release: &Release,
        force: bool,
    ) -> Result<PathBuf, OtaError> {
        self.set(Phase::Downloading, format!("downloading {}", release.version));
        match self.strategy.download_release(release, force).await {
            Ok(artifact) => {
                self.set(Phase::Idle, MSG_READY_TO_UPDATE);
                Ok(artifact)
            }
            Err(e) => {
                self.set(Phase::Idle, MSG_OUT_OF_DATE);
                Err(e)
            }
        }
    }

    /// Run the full install cycle: verify, unpack, install, post-install,
    /// migration tooling, cleanup. Publishes Installing sub-steps along the
    /// way and ends Idle/up-to-date on success or InstallError on failure.
    ///
    /// # Errors
    ///
    /// [`OtaError::InstallInProgress`] when a cycle is already running;
    /// otherwise the first failing step's error, also left in the status.
    pub async fn install(&self, release: &Release) -> Result<(), OtaError> {
        let Ok(_guard) = self.install_gate.try_lock() else {
            warn!("install requested while another install is running");
            return Err(OtaError::InstallInProgress);
        };
        match self.run_install_cycle(release).await {
            Ok(()) => {
                self.set(Phase::Idle, MSG_UP_TO_DATE);
                info!(version = release.version, "install cycle complete");
                Ok(())
            }
            Err(e) => {
                self.set(Phase::InstallError, e.to_string());
                Err(e)
            }
        }
    }

    async fn run_install_cycle(&self, release: &Release) -> Result<(), OtaError> {
        self.set(Phase::Installing, MSG_INSTALLING);
        let artifact = self.strategy.verify_release(release).await?;

        self.set(Phase::Installing, MSG_DECOMPRESS);
        self.strategy.extract_release(&artifact, release).await?;

        self.set(Phase::Installing, MSG_INSTALLING);
        self.strategy.install(release).await?;

        self.set(Phase::Installing, MSG_RESTARTING);
        self.strategy.post_install(release).await?;

        self.set(Phase::Installing, MSG_MIGRATION);
        self.strategy.download_all_migration_tools(release).await?;
        self.strategy.post_migration(release).await
    }

    /// Startup pass clearing any pending-upgrade marker from a prior boot.
    ///
    /// # Errors
    ///
    /// Propagates marker removal failures, which are also left visible as
    /// InstallError in the status.
    pub async fn migration_in_launch(&self) -> Result<(), OtaError> {
        self.set(Phase::Installing, MSG_MIGRATION);
        match self.strategy.migration_in_launch().await {
            Ok(()) => {
                self.set(Phase::Idle, MSG_UP_TO_DATE);
                Ok(())
            }
            Err(e) => {
                self.set(Phase::InstallError, e.to_string());
                Err(e)
            }
        }
    }

    async fn eligibility_message(&self, release: &Release) -> &'static str {
        if !self.strategy.should_upgrade(release).await {
            MSG_UP_TO_DATE
        } else if self.strategy.is_upgradable(release).await {
            MSG_READY_TO_UPDATE
        } else {
            MSG_OUT_OF_DATE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::constants::UPGRADE_PENDING_MARKER;
    use crate::strategy::DeploymentMode;
    use crate::test_utils::{StubMirror, StubResponse, sha256_hex, tar_gz};
    use std::collections::HashMap;
    use tempfile::TempDir;

    async fn archive_tracker(tmp: &TempDir, mirrors: Vec<String>) -> StatusTracker {
        let config = AgentConfig {
            cache_dir: tmp.path().join("cache"),
            sys_root: tmp.path().join("sysroot"),
            mirrors,
            mode: DeploymentMode::Archive,
            ..AgentConfig::default()
        };
        std::fs::create_dir_all(&config.sys_root).unwrap();
        StatusTracker::new(UpdateStrategy::construct(&config).unwrap())
    }

    /// One stub serving descriptor, manifest, and package for v0.4.9.
    async fn stub_release_server() -> StubMirror {
        let package = tar_gz(&[("usr/bin/otad", b"bits".as_slice())]);
        let manifest = format!("{} appliance-amd64.tar.gz\n", sha256_hex(&package));
        StubMirror::start_with_release(
            "version: v0.4.9\n\
             mirrors: [\"${SELF}\"]\n\
             packages:\n\
             \x20 - path: get/v0.4.9/appliance-amd64.tar.gz\n\
             \x20   architecture: amd64\n\
             checksums: get/v0.4.9/checksums.txt\n",
            HashMap::from([
                ("/get/v0.4.9/checksums.txt".to_string(), StubResponse::ok(manifest)),
                ("/get/v0.4.9/appliance-amd64.tar.gz".to_string(), StubResponse::ok(package)),
            ]),
        )
        .await
    }

    #[tokio::test]
    async fn test_initial_status_is_idle_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let tracker = archive_tracker(&tmp, vec!["http://127.0.0.1:9/".to_string()]).await;
        let status = tracker.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.message, MSG_UP_TO_DATE);
    }

    #[tokio::test]
    async fn test_fetch_reports_out_of_date_before_download() {
        let tmp = TempDir::new().unwrap();
        let server = stub_release_server().await;
        let tracker = archive_tracker(&tmp, vec![server.url()]).await;

        let release = tracker.fetch_release("latest").await.unwrap();
        let status = tracker.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.message, MSG_OUT_OF_DATE);

        tracker.download_release(&release, false).await.unwrap();
        let status = tracker.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.message, MSG_READY_TO_UPDATE);

        // After download, a re-fetch also reports ready.
        tracker.fetch_release("latest").await.unwrap();
        assert_eq!(tracker.status().message, MSG_READY_TO_UPDATE);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_message() {
        let tmp = TempDir::new().unwrap();
        let tracker = archive_tracker(&tmp, vec!["http://127.0.0.1:9/".to_string()]).await;
        assert!(tracker.fetch_release("latest").await.is_err());
        let status = tracker.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.message, MSG_UP_TO_DATE);
    }

    #[tokio::test]
    async fn test_failed_download_reports_out_of_date() {
        let tmp = TempDir::new().unwrap();
        let server = stub_release_server().await;
        let tracker = archive_tracker(&tmp, vec![server.url()]).await;
        let release = tracker.fetch_release("latest").await.unwrap();
        drop(server);

        assert!(tracker.download_release(&release, false).await.is_err());
        let status = tracker.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.message, MSG_OUT_OF_DATE);
    }

    #[tokio::test]
    async fn test_failed_marker_clear_is_visible_in_status() {
        let tmp = TempDir::new().unwrap();
        let config = AgentConfig {
            cache_dir: tmp.path().join("cache"),
            sys_root: tmp.path().join("sysroot"),
            mode: DeploymentMode::OfflineBank,
            ..AgentConfig::default()
        };
        // A directory at the marker path makes the removal fail.
        let marker = config.sys_root.join(UPGRADE_PENDING_MARKER);
        std::fs::create_dir_all(&marker).unwrap();
        std::fs::write(marker.join("blocker"), b"x").unwrap();
        let tracker = StatusTracker::new(UpdateStrategy::construct(&config).unwrap());

        assert!(tracker.migration_in_launch().await.is_err());
        let status = tracker.status();
        assert_eq!(status.phase, Phase::InstallError);
        assert!(status.message.contains("removing"));
    }

    #[tokio::test]
    async fn test_full_cycle_ends_up_to_date() {
        let tmp = TempDir::new().unwrap();
        let server = stub_release_server().await;
        let tracker = archive_tracker(&tmp, vec![server.url()]).await;

        let release = tracker.fetch_release("latest").await.unwrap();
        tracker.download_release(&release, false).await.unwrap();
        tracker.install(&release).await.unwrap();

        let status = tracker.status();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.message, MSG_UP_TO_DATE);
    }

    #[tokio::test]
    async fn test_install_without_artifact_is_install_error() {
        let tmp = TempDir::new().unwrap();
        let server = stub_release_server().await;
        let tracker = archive_tracker(&tmp, vec![server.url()]).await;

        let release = tracker.fetch_release("latest").await.unwrap();
        // No download happened: verification fails and the phase is terminal.
        assert!(tracker.install(&release).await.is_err());
        let status = tracker.status();
        assert_eq!(status.phase, Phase::InstallError);
        assert!(!status.message.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_install_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let server = stub_release_server().await;
        let tracker = archive_tracker(&tmp, vec![server.url()]).await;
        let release = tracker.fetch_release("latest").await.unwrap();

        let _guard = tracker.install_gate.lock().await;
        assert!(matches!(
            tracker.install(&release).await,
            Err(OtaError::InstallInProgress)
        ));
    }
}
