//! Update command - check for and apply a signed release.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use relaynode_update::{CURRENT_VERSION, UpdateConfig, UpdateManager, UpdateMode, UpdateOutcome};

/// Update mode override.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ModeArg {
    Auto,
    Notify,
    Disabled,
}

impl From<ModeArg> for UpdateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => UpdateMode::Auto,
            ModeArg::Notify => UpdateMode::Notify,
            ModeArg::Disabled => UpdateMode::Disabled,
        }
    }
}

/// Update CLI.
#[derive(Debug, Parser)]
pub struct UpdateCli {
    /// Only report whether a newer release is available
    #[arg(long, short = 'c')]
    pub check: bool,

    /// Directory the release archive is extracted into
    #[arg(long, value_name = "DIR")]
    pub install_dir: Option<PathBuf>,

    /// Release metadata URL
    #[arg(long, hide = true)]
    pub url: Option<String>,

    /// Override the configured update mode
    #[arg(long, value_enum)]
    pub mode: Option<ModeArg>,
}

impl UpdateCli {
    /// Apply command-line overrides on top of the stored config.
    pub fn apply_overrides(&self, mut config: UpdateConfig) -> UpdateConfig {
        if let Some(url) = &self.url {
            config.release_url = url.clone();
        }
        if let Some(dir) = &self.install_dir {
            config.install_dir = Some(dir.clone());
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        config
    }

    /// Run the update command.
    pub async fn run(self) -> Result<()> {
        let config = self.apply_overrides(UpdateConfig::load());
        tracing::debug!(
            mode = %config.mode,
            release_url = %config.release_url,
            "Update configuration"
        );

        let manager =
            UpdateManager::with_config(config).context("Failed to initialize update manager")?;

        if self.check {
            let outcome = manager.check().await;
            println!("relaynode v{}: {}", CURRENT_VERSION, outcome);
            if let UpdateOutcome::Available { latest, .. } = outcome {
                println!("Run 'relaynode update' to install v{}.", latest);
            }
            return Ok(());
        }

        manager
            .check_and_apply()
            .await
            .context("Update left the installation incomplete; the previous executable is kept as <name>.old")
    }
}
