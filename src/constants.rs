//! Global constants used throughout the otad codebase.
//!
//! Timeouts, URL placeholders, and well-known file names live here so the
//! values that shape mirror iteration and cache layout are discoverable in
//! one place.

use std::time::Duration;

/// Placeholder substituted with the selected mirror base URL at download time.
pub const MIRROR_PLACEHOLDER: &str = "${MIRROR}";

/// Placeholder substituted with the canonical runtime architecture tag.
pub const ARCH_PLACEHOLDER: &str = "${ARCH}";

/// Legacy download-domain placeholder still present in old migration lists.
///
/// Rewritten to [`MIRROR_PLACEHOLDER`] before substitution so entries written
/// against the retired single-domain scheme keep working.
pub const LEGACY_DOMAIN_PLACEHOLDER: &str = "${DOWNLOAD_DOMAIN}";

/// File name of the release descriptor served by mirrors and cached on disk.
pub const RELEASE_FILE_NAME: &str = "otad-release";

/// File name under which a fetched descriptor is persisted in the cache.
pub const CACHED_RELEASE_FILE_NAME: &str = "release.yaml";

/// Sentinel version reported by appliances flashed before versioning existed.
pub const LEGACY_WITHOUT_VERSION: &str = "LEGACY_WITHOUT_VERSION";

/// Marker file left on the system root while a bank upgrade awaits its
/// first boot. Cleared by `migration_in_launch`.
pub const UPGRADE_PENDING_MARKER: &str = "var/lib/otad/upgrade-pending";

/// Fixed staging path (relative to the system root) where an offline bundle
/// is expected to have been placed by the operator.
pub const OFFLINE_BUNDLE_PATH: &str = "var/lib/otad/offline/bundle.raucb";

/// Timeout for a single mirror reachability probe.
pub const MIRROR_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for fetching a release descriptor from one mirror.
pub const RELEASE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for downloading one package from one mirror.
///
/// Bundles run to a few hundred megabytes on slow uplinks, so this is
/// deliberately generous; per-mirror iteration bounds the total.
pub const PACKAGE_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(1800);

/// Timeout for a `rauc` invocation that only inspects a bundle.
pub const BANK_INFO_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a `rauc install` run writing the inactive bank.
pub const BANK_INSTALL_TIMEOUT: Duration = Duration::from_secs(3600);

/// Minimum free bytes required on the cache filesystem before a bank
/// install is attempted.
pub const MIN_INSTALL_FREE_BYTES: u64 = 1024 * 1024 * 1024;
