//! Version normalization and the custom upgrade-eligibility order.
//!
//! Appliances in the field report versions in several shapes: plain semver
//! (`0.4.9`), prefixed (`v0.4.9`), four-component legacy counters (`0.3.5.1`),
//! a pre-versioning sentinel, and hot-fix builds encoded as numeric prerelease
//! suffixes (`0.4.9-2`). This module folds all of them into one total order.
//!
//! The order is deliberately non-standard. For an equal `major.minor.patch`
//! triple:
//!
//! ```text
//! named prerelease (0.4.9-alpha5)  <  release (0.4.9)  <  numeric build (0.4.9-2)
//! ```
//!
//! Standard semver would put `0.4.9-2` *below* `0.4.9`. Here a purely numeric
//! prerelease field is a hot-fix build counter and must always win over the
//! nominal release, while alphabetic tags remain release candidates that lose
//! to it. Across differing triples the plain numeric comparison dominates
//! regardless of classification.

use crate::constants::LEGACY_WITHOUT_VERSION;
use crate::core::OtaError;
use semver::Prerelease;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Classification of a normalized version's prerelease field, used as the
/// middle key of the custom order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionTag {
    /// Alphabetic prerelease tag (`-alpha1`, `-beta2`): below the release.
    NamedPrerelease,
    /// No prerelease field: the nominal release.
    Release,
    /// Purely numeric prerelease (`-2`, `-1.1`): a hot-fix build, above the
    /// release.
    NumericBuild,
}

/// A normalized version value carrying its classification.
///
/// Construct via [`normalize`]; the ordering implemented here is the custom
/// one described in the module docs, not plain semver precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    semver: semver::Version,
    tag: VersionTag,
}

impl Version {
    /// The underlying normalized semantic version.
    #[must_use]
    pub const fn semver(&self) -> &semver::Version {
        &self.semver
    }

    /// The prerelease classification driving the custom order.
    #[must_use]
    pub const fn tag(&self) -> VersionTag {
        self.tag
    }
}

impl fmt::Display for Version {
    /// Canonical form: `v` prefix plus the normalized semver.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.semver)
    }
}

impl FromStr for Version {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        normalize(s)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        // The base triple dominates regardless of classification.
        let base = (self.semver.major, self.semver.minor, self.semver.patch).cmp(&(
            other.semver.major,
            other.semver.minor,
            other.semver.patch,
        ));
        if base != Ordering::Equal {
            return base;
        }
        match self.tag.cmp(&other.tag) {
            // Same class: semver prerelease precedence is correct within a
            // class (numeric identifiers compare numerically, named ones the
            // standard way).
            Ordering::Equal => self.semver.pre.cmp(&other.semver.pre),
            unequal => unequal,
        }
    }
}

/// Classify a prerelease field: all-digit dot groups are a numeric build.
fn classify(pre: &Prerelease) -> VersionTag {
    if pre.is_empty() {
        return VersionTag::Release;
    }
    let numeric = pre.as_str().split('.').all(|group| {
        !group.is_empty() && group.bytes().all(|b| b.is_ascii_digit())
    });
    if numeric { VersionTag::NumericBuild } else { VersionTag::NamedPrerelease }
}

/// Normalize a raw version string into the total order.
///
/// Rules, applied in sequence:
/// 1. the legacy sentinel maps to `0.0.0-legacy` so it loses to everything,
/// 2. a leading `v`/`V` is stripped (the canonical [`Version`] display
///    re-adds it),
/// 3. valid semver is taken as-is,
/// 4. otherwise a `major.minor.patch.tail` legacy counter is rewritten with
///    `-` before the tail (`0.3.5.1` → `0.3.5-1`), turning the trailing build
///    counter into a prerelease field the order can classify.
///
/// Normalization is idempotent over the canonical display form:
/// `normalize(&v.to_string())` always returns `v` unchanged.
///
/// # Errors
///
/// [`OtaError::InvalidVersion`] when the string cannot be coerced into any of
/// the supported shapes. Unlike malformed migration-list lines, this is a hard
/// failure for the operation that needed the version.
pub fn normalize(raw: &str) -> Result<Version, OtaError> {
    let raw = raw.trim();
    if raw == LEGACY_WITHOUT_VERSION {
        let semver = semver::Version {
            major: 0,
            minor: 0,
            patch: 0,
            pre: Prerelease::new("legacy").expect("static prerelease is valid"),
            build: semver::BuildMetadata::EMPTY,
        };
        let tag = classify(&semver.pre);
        return Ok(Version { semver, tag });
    }

    let stripped = raw.strip_prefix(['v', 'V']).unwrap_or(raw);

    let semver = match semver::Version::parse(stripped) {
        Ok(v) => v,
        Err(_) => parse_legacy(raw, stripped)?,
    };
    let tag = classify(&semver.pre);
    Ok(Version { semver, tag })
}

/// Rewrite a legacy dotted counter (`0.3.5.1`, `0.3.5.1.1`) into semver by
/// turning everything past the patch field into a `-`-separated prerelease.
fn parse_legacy(raw: &str, stripped: &str) -> Result<semver::Version, OtaError> {
    let mut fields = stripped.splitn(3, '.');
    let (Some(major), Some(minor), Some(rest)) = (fields.next(), fields.next(), fields.next())
    else {
        return Err(OtaError::InvalidVersion {
            version: raw.to_string(),
            reason: "expected at least major.minor.patch".to_string(),
        });
    };

    let rewritten = match rest.split_once('.') {
        Some((patch, tail)) => format!("{major}.{minor}.{patch}-{tail}"),
        None => format!("{major}.{minor}.{rest}"),
    };

    semver::Version::parse(&rewritten).map_err(|e| OtaError::InvalidVersion {
        version: raw.to_string(),
        reason: e.to_string(),
    })
}

/// True iff `candidate` is upgrade-eligible relative to `current`.
///
/// The predicate is deliberately a disjunction: `candidate` wins if it
/// outranks `current` under the custom classification order *or* under
/// standard semver precedence. The two orders disagree on numeric builds
/// (custom lifts `0.4.9-2` above `0.4.9`, standard puts it below) and on
/// numeric-vs-named prereleases, and field behavior requires both
/// directions of those disagreements to count as newer: a hot-fix build must
/// replace the release it patches, and a later release candidate must
/// replace an older hot-fix line. The result is not antisymmetric, which is
/// intended.
#[must_use]
pub fn is_newer(current: &Version, candidate: &Version) -> bool {
    candidate > current || candidate.semver > current.semver
}

/// Convenience wrapper normalizing both operands before comparing.
///
/// # Errors
///
/// Fails if either raw string cannot be normalized.
pub fn is_newer_raw(current: &str, candidate: &str) -> Result<bool, OtaError> {
    Ok(is_newer(&normalize(current)?, &normalize(candidate)?))
}
