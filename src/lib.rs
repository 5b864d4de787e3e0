//! otad - over-the-air update agent for appliance systems
//!
//! otad keeps an embedded Linux appliance current against a set of release
//! mirrors. It periodically fetches a YAML release descriptor, decides
//! upgrade eligibility under a version order that understands legacy
//! four-part versions and numeric build suffixes, downloads and SHA-256
//! verifies the package for the local architecture with sequential mirror
//! fallback, and applies it through one of three installation mechanisms:
//!
//! - **online-bank**: dual-bank appliances with network access; the bundle
//!   is handed to the system `rauc` binary and activates on reboot,
//! - **offline-bank**: air-gapped dual-bank appliances; the bundle is
//!   pre-staged on local storage and carries its own release descriptor,
//! - **archive**: legacy targets updated by unpacking a tarball directly
//!   onto the filesystem.
//!
//! Every operation publishes phase and message through [`status::StatusTracker`],
//! and module data migrations are planned from per-module version list files
//! shipped inside the release.
//!
//! # Quick Start
//!
//! ```no_run
//! use otad::config::AgentConfig;
//! use otad::orchestrator::Orchestrator;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AgentConfig::load(None).await?;
//! let orchestrator = Orchestrator::new(config)?;
//! if let Some(release) = orchestrator.check_once(false).await? {
//!     println!("release {} downloaded and ready", release.version);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bank;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod download;
pub mod fetcher;
pub mod migration;
pub mod mirror;
pub mod orchestrator;
pub mod release;
pub mod status;
pub mod strategy;
pub mod utils;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crate::core::{ErrorContext, OtaError, user_friendly_error};
