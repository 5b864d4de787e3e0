//! Release descriptor data model.
//!
//! A [`Release`] is the structured descriptor mirrors serve for each
//! published update: the target version, the mirror list to download from,
//! the per-architecture packages, the modules carried by the release, and
//! presentation extras (notes, code name, background image). Instances are
//! immutable value objects rebuilt on every fetch cycle; a successful fetch
//! replaces the cached copy wholesale.
//!
//! The on-disk and on-wire form is YAML with the field names of the external
//! descriptor format; `serde` derives keep the mapping declarative.

use crate::constants::CACHED_RELEASE_FILE_NAME;
use crate::core::OtaError;
use crate::version::{self, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One architecture-specific downloadable artifact within a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Path of the artifact relative to a mirror base URL (or an absolute
    /// URL for out-of-tree artifacts).
    pub path: String,
    /// Architecture this artifact was built for.
    pub architecture: Architecture,
}

/// A logical installable unit that may carry its own migration-tool chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    /// Full service name, e.g. `otad-user-service`.
    pub name: String,
    /// Short name used for migration list lookup, e.g. `user-service`.
    pub short: String,
}

/// CPU architectures a release can ship packages for.
///
/// The 32-bit ARM tag is canonicalized to the dashed `arm-7` form, distinct
/// from the generic `arm` the runtime reports; descriptors written with the
/// older `armv7` spelling still deserialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    /// 64-bit x86.
    #[serde(rename = "amd64")]
    Amd64,
    /// 64-bit ARM.
    #[serde(rename = "arm64")]
    Arm64,
    /// 32-bit ARMv7.
    #[serde(rename = "arm-7", alias = "armv7")]
    ArmV7,
}

impl Architecture {
    /// Map the runtime architecture onto the release package tag.
    ///
    /// # Errors
    ///
    /// [`OtaError::UnsupportedArchitecture`] for architectures no release
    /// ships packages for; this is a hard failure at install time.
    pub fn detect() -> Result<Self, OtaError> {
        Self::from_runtime(std::env::consts::ARCH)
    }

    /// Map a raw runtime architecture string (as `std::env::consts::ARCH`
    /// reports it) onto the release package tag.
    pub fn from_runtime(arch: &str) -> Result<Self, OtaError> {
        match arch {
            "x86_64" => Ok(Self::Amd64),
            "aarch64" => Ok(Self::Arm64),
            "arm" => Ok(Self::ArmV7),
            other => Err(OtaError::UnsupportedArchitecture { arch: other.to_string() }),
        }
    }

    /// Canonical tag used in descriptors and URL substitution.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::ArmV7 => "arm-7",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A versioned, fetchable descriptor of an update and its artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Target version string as published (normalized on demand).
    pub version: String,

    /// Human-readable release notes.
    #[serde(default)]
    pub release_notes: String,

    /// Ordered list of mirror base URLs, tried first to last.
    pub mirrors: Vec<String>,

    /// Per-architecture downloadable artifacts.
    #[serde(default)]
    pub packages: Vec<Package>,

    /// Modules carried by this release.
    #[serde(default)]
    pub modules: Vec<Module>,

    /// Checksum manifest path relative to a mirror (or absolute URL).
    #[serde(default)]
    pub checksums: String,

    /// Marks a release operators should not skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub important: Option<bool>,

    /// Marketing code name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Background image URL, prefetched opportunistically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
}

impl Release {
    /// Parse a descriptor from its YAML form.
    ///
    /// # Errors
    ///
    /// Returns the underlying YAML error for unparseable input; mirror
    /// iteration treats this as a transient per-mirror failure.
    pub fn from_yaml(text: &str) -> Result<Self, OtaError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Serialize the descriptor back to YAML for cache persistence.
    pub fn to_yaml(&self) -> Result<String, OtaError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The normalized target version of this release.
    ///
    /// # Errors
    ///
    /// A descriptor carrying an unparseable version is a hard failure for
    /// every operation that needs it.
    pub fn target_version(&self) -> Result<Version, OtaError> {
        version::normalize(&self.version)
    }

    /// The package built for `arch`, if this release ships one.
    #[must_use]
    pub fn package_for(&self, arch: Architecture) -> Option<&Package> {
        self.packages.iter().find(|p| p.architecture == arch)
    }

    /// Cache directory holding everything downloaded for this release.
    #[must_use]
    pub fn cache_dir(&self, cache_root: &Path) -> PathBuf {
        cache_root.join("releases").join(&self.version)
    }

    /// Persist the descriptor under its release cache directory and as the
    /// process-wide last-known-good copy at the cache root.
    ///
    /// # Errors
    ///
    /// Fails on filesystem errors creating the cache tree or writing.
    pub async fn persist(&self, cache_root: &Path) -> Result<PathBuf, OtaError> {
        let yaml = self.to_yaml()?;
        let dir = self.cache_dir(cache_root);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(CACHED_RELEASE_FILE_NAME);
        tokio::fs::write(&path, &yaml).await?;
        tokio::fs::write(cache_root.join(CACHED_RELEASE_FILE_NAME), &yaml).await?;
        Ok(path)
    }

    /// Load the last-known-good descriptor persisted at the cache root, if
    /// one exists from a previous run.
    pub async fn load_last_good(cache_root: &Path) -> Option<Self> {
        let path = cache_root.join(CACHED_RELEASE_FILE_NAME);
        let text = tokio::fs::read_to_string(&path).await.ok()?;
        Self::from_yaml(&text).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
version: v0.4.9
release_notes: |
  Fixes the widget.
mirrors:
  - https://mirror-a.example.com/
  - https://mirror-b.example.com/
packages:
  - path: get/v0.4.9/appliance-amd64.tar.gz
    architecture: amd64
  - path: get/v0.4.9/appliance-arm-7.tar.gz
    architecture: armv7
modules:
  - name: otad-user-service
    short: user-service
checksums: get/v0.4.9/checksums.txt
important: true
"#;

    #[test]
    fn test_descriptor_round_trip() {
        let release = Release::from_yaml(DESCRIPTOR).unwrap();
        assert_eq!(release.version, "v0.4.9");
        assert_eq!(release.mirrors.len(), 2);
        assert_eq!(release.modules[0].short, "user-service");
        assert_eq!(release.important, Some(true));
        assert!(release.code.is_none());

        let yaml = release.to_yaml().unwrap();
        let reparsed = Release::from_yaml(&yaml).unwrap();
        assert_eq!(release, reparsed);
    }

    #[test]
    fn test_architecture_aliases() {
        let release = Release::from_yaml(DESCRIPTOR).unwrap();
        // Written as `armv7` in the descriptor, canonicalized on re-serialize.
        let pkg = release.package_for(Architecture::ArmV7).unwrap();
        assert!(pkg.path.contains("arm-7"));
        let yaml = release.to_yaml().unwrap();
        assert!(yaml.contains("arm-7"));
    }

    #[test]
    fn test_package_lookup_misses_absent_arch() {
        let release = Release::from_yaml(DESCRIPTOR).unwrap();
        assert!(release.package_for(Architecture::Arm64).is_none());
    }

    #[test]
    fn test_runtime_arch_mapping() {
        assert_eq!(Architecture::from_runtime("x86_64").unwrap(), Architecture::Amd64);
        assert_eq!(Architecture::from_runtime("aarch64").unwrap(), Architecture::Arm64);
        assert_eq!(Architecture::from_runtime("arm").unwrap(), Architecture::ArmV7);
        assert!(matches!(
            Architecture::from_runtime("riscv64"),
            Err(OtaError::UnsupportedArchitecture { .. })
        ));
    }

    #[test]
    fn test_target_version_normalized() {
        let release = Release::from_yaml(DESCRIPTOR).unwrap();
        assert_eq!(release.target_version().unwrap().to_string(), "v0.4.9");
    }

    #[tokio::test]
    async fn test_persist_and_reload_last_good() {
        let tmp = tempfile::TempDir::new().unwrap();
        let release = Release::from_yaml(DESCRIPTOR).unwrap();
        let path = release.persist(tmp.path()).await.unwrap();
        assert!(path.ends_with("releases/v0.4.9/release.yaml"));

        let reloaded = Release::load_last_good(tmp.path()).await.unwrap();
        assert_eq!(reloaded, release);
    }

    #[tokio::test]
    async fn test_load_last_good_absent() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Release::load_last_good(tmp.path()).await.is_none());
    }
}
