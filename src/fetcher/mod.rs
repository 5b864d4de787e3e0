//! Release descriptor retrieval with mirror fallback.
//!
//! `ReleaseFetcher` walks the configured mirror list in order and returns
//! the first parseable descriptor. Per-mirror failures (network, HTTP
//! status, YAML) are transient: logged and skipped. Only after every mirror
//! fails does the fetcher fall back to the last successfully fetched
//! descriptor, held in memory and reloaded from the cache at startup; with
//! no fallback available the typed `ReleaseNotFound` error surfaces.
//!
//! Iteration is sequential by design: first success wins deterministically
//! and mirrors are not hammered in parallel.

use crate::constants::{RELEASE_FETCH_TIMEOUT, RELEASE_FILE_NAME};
use crate::core::OtaError;
use crate::release::Release;
use crate::utils::join_url;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Fetches release descriptors from ranked mirrors with cached fallback.
pub struct ReleaseFetcher {
    client: reqwest::Client,
    mirrors: Vec<String>,
    cache_root: PathBuf,
    // Guards only the cached value, never held across I/O.
    last_good: RwLock<Option<Release>>,
}

impl ReleaseFetcher {
    /// Create a fetcher over the configured mirror list.
    ///
    /// # Panics
    ///
    /// Panics only if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new(mirrors: Vec<String>, cache_root: PathBuf) -> Self {
        let client = reqwest::Client::builder()
            .timeout(RELEASE_FETCH_TIMEOUT)
            .build()
            .expect("HTTP client construction cannot fail with static configuration");
        Self { client, mirrors, cache_root, last_good: RwLock::new(None) }
    }

    /// Reload the last-known-good descriptor persisted by a previous run,
    /// so the cached fallback survives restarts.
    pub async fn restore_cached(&self) {
        if let Some(release) = Release::load_last_good(&self.cache_root).await {
            info!(version = %release.version, "restored cached release descriptor");
            *self.last_good.write().expect("cached release lock poisoned") = Some(release);
        }
    }

    /// Snapshot of the most recently fetched descriptor, if any.
    #[must_use]
    pub fn last_good(&self) -> Option<Release> {
        self.last_good.read().expect("cached release lock poisoned").clone()
    }

    /// Fetch the descriptor for `tag`, trying each mirror in order.
    ///
    /// The first mirror yielding a parseable, non-error response wins and
    /// its descriptor is persisted to the cache and remembered as the new
    /// fallback.
    ///
    /// # Errors
    ///
    /// [`OtaError::ReleaseNotFound`] when every mirror fails and no cached
    /// descriptor exists.
    pub async fn fetch(&self, tag: &str) -> Result<Release, OtaError> {
        for mirror in &self.mirrors {
            let url = join_url(mirror, &format!("get/{tag}/{RELEASE_FILE_NAME}"));
            match self.fetch_one(&url).await {
                Ok(release) => {
                    info!(mirror, version = %release.version, "fetched release descriptor");
                    if let Err(e) = release.persist(&self.cache_root).await {
                        // Persistence failure degrades restart fallback only.
                        warn!(error = %e, "failed to persist release descriptor");
                    }
                    *self.last_good.write().expect("cached release lock poisoned") =
                        Some(release.clone());
                    return Ok(release);
                }
                Err(e) => {
                    warn!(mirror, error = %e, "mirror failed, trying next");
                }
            }
        }

        match self.last_good() {
            Some(release) => {
                info!(version = %release.version, "all mirrors failed, using cached release");
                Ok(release)
            }
            None => Err(OtaError::ReleaseNotFound { tag: tag.to_string() }),
        }
    }

    /// Fetch and parse one mirror's descriptor.
    async fn fetch_one(&self, url: &str) -> Result<Release, OtaError> {
        debug!(url, "requesting release descriptor");
        let response = self.client.get(url).send().await?.error_for_status()?;
        let text = response.text().await?;
        Release::from_yaml(&text)
    }
}
