//! Top-level update loop.
//!
//! The orchestrator owns the [`StatusTracker`] and drives the periodic
//! check cycle: fetch the descriptor for the configured tag, and when the
//! release outranks the installed version, download it so the appliance is
//! ready the moment an install is triggered. Installation itself never
//! happens automatically; it is triggered explicitly (CLI verb or a future
//! control channel) and runs the full verify/unpack/install/migration
//! sequence through the tracker.

use crate::config::AgentConfig;
use crate::core::OtaError;
use crate::release::Release;
use crate::status::StatusTracker;
use crate::strategy::UpdateStrategy;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Drives periodic checks and explicit install triggers.
pub struct Orchestrator {
    tracker: Arc<StatusTracker>,
    config: AgentConfig,
}

impl Orchestrator {
    /// Build the orchestrator for the configured deployment mode.
    ///
    /// # Errors
    ///
    /// Fails when the local architecture is unsupported.
    pub fn new(config: AgentConfig) -> Result<Self, OtaError> {
        let strategy = UpdateStrategy::construct(&config)?;
        Ok(Self { tracker: Arc::new(StatusTracker::new(strategy)), config })
    }

    /// The shared status tracker, for status consumers.
    #[must_use]
    pub fn tracker(&self) -> Arc<StatusTracker> {
        Arc::clone(&self.tracker)
    }

    /// Long-running agent loop: clear any pending-upgrade marker from the
    /// previous boot, then check on the configured interval forever. Cycle
    /// errors are logged and never end the loop; the next tick retries.
    ///
    /// # Errors
    ///
    /// Fails only when the startup marker cleanup fails.
    pub async fn run(&self) -> Result<(), OtaError> {
        self.tracker.migration_in_launch().await?;

        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval(), tag = self.config.release_tag, "update loop started");
        loop {
            ticker.tick().await;
            match self.check_once(false).await {
                Ok(Some(release)) => {
                    info!(version = release.version, "release ready to install");
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "update check failed"),
            }
        }
    }

    /// One check cycle: fetch the descriptor and download the package when
    /// an upgrade is due. Returns the downloaded release, or `None` when
    /// the appliance is already up to date.
    ///
    /// # Errors
    ///
    /// Propagates fetch and download errors.
    pub async fn check_once(&self, force: bool) -> Result<Option<Release>, OtaError> {
        let release = self.tracker.fetch_release(&self.config.release_tag).await?;
        if !self.tracker.strategy().should_upgrade(&release).await {
            return Ok(None);
        }

        // Background-image prefetch stays off the critical path.
        let tracker = Arc::clone(&self.tracker);
        let prefetch = release.clone();
        tokio::spawn(async move {
            tracker.strategy().downloads().prefetch_background(&prefetch).await;
        });

        self.tracker.download_release(&release, force).await?;
        Ok(Some(release))
    }

    /// Explicit install trigger: make sure the latest release is downloaded,
    /// then run the full install cycle.
    ///
    /// # Errors
    ///
    /// Propagates fetch, download, and install-cycle errors, including
    /// [`OtaError::InstallInProgress`] when a cycle is already running.
    pub async fn install_latest(&self) -> Result<Option<Release>, OtaError> {
        let release = self.tracker.fetch_release(&self.config.release_tag).await?;
        if !self.tracker.strategy().should_upgrade(&release).await {
            info!(version = release.version, "already up to date");
            return Ok(None);
        }
        self.tracker.download_release(&release, false).await?;
        self.tracker.install(&release).await?;
        Ok(Some(release))
    }
}
