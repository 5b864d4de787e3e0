//! Mirror reachability probing and latency ranking.
//!
//! Fetch and download iterate mirrors sequentially in configured order, but
//! when several mirrors are viable the selector lets callers put the
//! lowest-latency one first. Probes are cheap bounded-timeout GETs issued
//! concurrently; the sequential "first success wins" rule only applies to
//! the real fetch/download traffic, not to probing.

use crate::constants::MIRROR_PROBE_TIMEOUT;
use futures::future::join_all;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Ranks candidate mirrors by reachability and latency.
pub struct MirrorSelector {
    client: reqwest::Client,
}

impl Default for MirrorSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorSelector {
    /// Create a selector with the standard probe timeout.
    ///
    /// # Panics
    ///
    /// Panics only if the TLS backend cannot be initialized, which is a
    /// broken deployment rather than a runtime condition.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(MIRROR_PROBE_TIMEOUT)
            .connect_timeout(MIRROR_PROBE_TIMEOUT)
            .build()
            .expect("HTTP client construction cannot fail with static configuration");
        Self { client }
    }

    /// Probe all candidates concurrently and return the fastest responder.
    ///
    /// Unreachable candidates are excluded. `None` means every candidate
    /// timed out or refused, and signals the caller to fall back to plain
    /// sequential trial of the configured order.
    pub async fn fastest(&self, mirrors: &[String]) -> Option<String> {
        let probes = mirrors.iter().map(|mirror| async {
            self.probe(mirror).await.map(|latency| (mirror.clone(), latency))
        });

        let mut reachable: Vec<(String, Duration)> =
            join_all(probes).await.into_iter().flatten().collect();
        reachable.sort_by_key(|(_, latency)| *latency);

        match reachable.into_iter().next() {
            Some((mirror, latency)) => {
                debug!(mirror, ?latency, "selected fastest mirror");
                Some(mirror)
            }
            None => {
                warn!("no mirror reachable, falling back to sequential trial");
                None
            }
        }
    }

    /// Measure one mirror's response latency; `None` when unreachable.
    ///
    /// Any HTTP response counts as reachable; the probe checks the path to
    /// the host, not the presence of a particular release.
    async fn probe(&self, mirror: &str) -> Option<Duration> {
        let started = Instant::now();
        match self.client.get(mirror).send().await {
            Ok(_) => Some(started.elapsed()),
            Err(e) => {
                debug!(mirror, error = %e, "mirror probe failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{StubMirror, StubResponse, unreachable_mirror};
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_fastest_prefers_low_latency() {
        let slow = StubMirror::start(HashMap::from([(
            "/".to_string(),
            StubResponse::ok("ok").with_delay(Duration::from_millis(300)),
        )]))
        .await;
        let fast = StubMirror::start(HashMap::from([("/".to_string(), StubResponse::ok("ok"))]))
            .await;

        let selector = MirrorSelector::new();
        let mirrors = vec![slow.url(), fast.url()];
        let fastest = selector.fastest(&mirrors).await.unwrap();
        assert_eq!(fastest, fast.url());
    }

    #[tokio::test]
    async fn test_unreachable_candidates_excluded() {
        let dead = unreachable_mirror().await;
        let live = StubMirror::start(HashMap::from([("/".to_string(), StubResponse::ok("ok"))]))
            .await;

        let selector = MirrorSelector::new();
        let fastest = selector.fastest(&[dead, live.url()]).await.unwrap();
        assert_eq!(fastest, live.url());
    }

    #[tokio::test]
    async fn test_all_unreachable_yields_none() {
        let selector = MirrorSelector::new();
        let mirrors = vec![unreachable_mirror().await, unreachable_mirror().await];
        assert!(selector.fastest(&mirrors).await.is_none());
    }
}
