//! Agent configuration.
//!
//! otad reads one TOML file (default `/etc/otad/otad.toml`, overridable via
//! the `OTAD_CONFIG` environment variable or `--config`). Every field has a
//! default so a bare appliance runs with no file at all. The values here are
//! the boundary handed into the core: cache directory, system root, mirror
//! list, release tag, deployment mode, and the check interval.
//!
//! ```toml
//! mode = "online-bank"
//! cache_dir = "/var/cache/otad"
//! sys_root = "/"
//! release_tag = "latest"
//! check_interval_secs = 3600
//! mirrors = [
//!     "https://get.otad.io/",
//!     "https://mirror.eu.otad.io/",
//! ]
//! ```

use crate::core::OtaError;
use crate::strategy::DeploymentMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/otad/otad.toml";

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "OTAD_CONFIG";

/// Primary release server used when no mirrors are configured.
pub const DEFAULT_RELEASE_BASE: &str = "https://get.otad.io/";

/// Everything the update core needs from the outside world.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Working directory for descriptors, packages, and extraction trees.
    pub cache_dir: PathBuf,
    /// Root of the filesystem being updated (`/` on real appliances, a
    /// scratch directory in tests).
    pub sys_root: PathBuf,
    /// Ordered mirror base URLs.
    pub mirrors: Vec<String>,
    /// Release tag requested from mirrors.
    pub release_tag: String,
    /// Seconds between periodic update checks.
    pub check_interval_secs: u64,
    /// Which installation mechanism this appliance uses.
    pub mode: DeploymentMode,
    /// Path of the bank updater binary; `None` resolves `rauc` from `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rauc_binary: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/var/cache/otad"),
            sys_root: PathBuf::from("/"),
            mirrors: vec![DEFAULT_RELEASE_BASE.to_string()],
            release_tag: "latest".to_string(),
            check_interval_secs: 3600,
            mode: DeploymentMode::OnlineBank,
            rauc_binary: None,
        }
    }
}

impl AgentConfig {
    /// Load configuration from `path`, the `OTAD_CONFIG` override, or the
    /// default location, in that priority. A missing file yields defaults;
    /// an unparseable file is an error (silent misconfiguration of an
    /// update agent is worse than refusing to start).
    ///
    /// # Errors
    ///
    /// Fails on unreadable or unparseable configuration.
    pub async fn load(path: Option<&Path>) -> Result<Self, OtaError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_PATH_ENV)
                .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from),
        };

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                info!(path = %path.display(), "loaded configuration");
                Ok(toml::from_str(&text)?)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no configuration file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(OtaError::FileSystemError {
                operation: format!("reading {}", path.display()),
                source: e,
            }),
        }
    }

    /// The periodic check interval as a [`Duration`].
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Move `mirror` to the front of the list, keeping the rest in their
    /// configured order. Fetch and download try mirrors front to back, so
    /// this is how latency ranking takes effect.
    pub fn promote_mirror(&mut self, mirror: &str) {
        if let Some(position) = self.mirrors.iter().position(|m| m == mirror) {
            let promoted = self.mirrors.remove(position);
            self.mirrors.insert(0, promoted);
        }
    }
}
