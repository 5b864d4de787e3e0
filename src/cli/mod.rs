//! Command-line interface.
//!
//! `otad run` is the long-running agent; the other verbs are one-shot
//! operations against the same configuration, useful interactively and from
//! provisioning scripts.

use crate::config::AgentConfig;
use crate::core::OtaError;
use crate::mirror::MirrorSelector;
use crate::orchestrator::Orchestrator;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

/// Over-the-air update agent for appliance systems.
#[derive(Debug, Parser)]
#[command(name = "otad", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (falls back to $OTAD_CONFIG, then
    /// /etc/otad/otad.toml).
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent: periodic update checks until terminated.
    Run,
    /// Check for an available update and report eligibility.
    Check,
    /// Download the latest eligible release into the cache.
    Download {
        /// Re-download even when a verified copy is already cached.
        #[arg(long)]
        force: bool,
    },
    /// Download (if needed) and install the latest eligible release.
    Install,
    /// Print the current update status as JSON.
    Status,
}

impl Cli {
    /// Execute the selected command.
    ///
    /// # Errors
    ///
    /// Returns the first configuration or update error; the caller renders
    /// it for the terminal.
    pub async fn execute(self) -> anyhow::Result<()> {
        let mut config = AgentConfig::load(self.config.as_deref()).await?;

        // Put the lowest-latency mirror first for verbs that hit the
        // network; `status` stays offline.
        if !matches!(self.command, Command::Status) && config.mirrors.len() > 1 {
            if let Some(fastest) = MirrorSelector::new().fastest(&config.mirrors).await {
                config.promote_mirror(&fastest);
            }
        }

        let tag = config.release_tag.clone();
        let orchestrator = Orchestrator::new(config)?;

        match self.command {
            Command::Run => orchestrator.run().await?,
            Command::Check => {
                let tracker = orchestrator.tracker();
                let release = tracker.fetch_release(&tag).await?;
                let status = tracker.status();
                println!(
                    "{} {} ({})",
                    "latest:".bold(),
                    release.version.green(),
                    status.message
                );
            }
            Command::Download { force } => {
                match orchestrator.check_once(force).await? {
                    Some(release) => {
                        println!("{} {}", "downloaded".green().bold(), release.version);
                    }
                    None => println!("{}", "already up to date".green()),
                }
            }
            Command::Install => {
                match orchestrator.install_latest().await {
                    Ok(Some(release)) => {
                        println!("{} {}", "installed".green().bold(), release.version);
                    }
                    Ok(None) => println!("{}", "already up to date".green()),
                    Err(e) => {
                        // Leave the terminal status visible before failing.
                        let status = orchestrator.tracker().status();
                        eprintln!("{} {}", "status:".red().bold(), status.message);
                        return Err(e.into());
                    }
                }
            }
            Command::Status => {
                let status = orchestrator.tracker().status();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status).map_err(|e| OtaError::Other(
                        format!("status serialization failed: {e}")
                    ))?
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_verbs() {
        let cli = Cli::parse_from(["otad", "check"]);
        assert!(matches!(cli.command, Command::Check));

        let cli = Cli::parse_from(["otad", "download", "--force"]);
        assert!(matches!(cli.command, Command::Download { force: true }));

        let cli = Cli::parse_from(["otad", "--config", "/tmp/otad.toml", "status"]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/otad.toml")));
    }
}
