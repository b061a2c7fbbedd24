//! Update manager - sequences check, download, verification and replacement.

use std::io::Cursor;

use chrono::{DateTime, Duration, Utc};

use crate::api::{ReleaseClient, ReleaseDescriptor};
use crate::config::{UpdateConfig, UpdateMode};
use crate::error::{UpdateError, UpdateResult};
use crate::extract::stage_archive;
use crate::install::InstallationTarget;
use crate::lock::UpdateLock;
use crate::trust::TrustAnchor;
use crate::verify::IntegrityVerifier;
use crate::version::{VersionComparison, compare_to_release};
use crate::{CURRENT_VERSION, STAGING_ARCHIVE, STAGING_SIGNATURE};

/// Stage of a single update attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    CheckingRemote,
    Deciding,
    Downloading,
    Verifying,
    Staging,
    Replacing,
    Restarting,
    /// Failed after the download started; the old binary keeps running
    Aborted,
}

impl UpdateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CheckingRemote => "checking-remote",
            Self::Deciding => "deciding",
            Self::Downloading => "downloading",
            Self::Verifying => "verifying",
            Self::Staging => "staging",
            Self::Replacing => "replacing",
            Self::Restarting => "restarting",
            Self::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn transition(state: UpdateState) {
    tracing::debug!(state = %state, "Update state");
}

/// Outcome of an update attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Updates are turned off in configuration
    Disabled,
    /// Release metadata could not be fetched or parsed
    Unavailable,
    /// Running version is not older than the latest release
    UpToDate { current: String, latest: String },
    /// Newer release is still inside the grace window
    Deferred {
        version: String,
        published_at: DateTime<Utc>,
    },
    /// Newer release exists but applying it was not requested
    Available { current: String, latest: String },
    /// New release is installed; the process should restart
    Applied { from: String, to: String },
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "automatic updates are disabled"),
            Self::Unavailable => write!(f, "release information is not available"),
            Self::UpToDate { current, latest } => {
                write!(f, "no update needed (running {}, latest {})", current, latest)
            }
            Self::Deferred {
                version,
                published_at,
            } => write!(
                f,
                "release {} was published at {} and is still inside the grace window",
                version, published_at
            ),
            Self::Available { current, latest } => {
                write!(f, "update available: {} -> {}", current, latest)
            }
            Self::Applied { from, to } => write!(f, "update applied: {} -> {}", from, to),
        }
    }
}

/// Minimum age of a release before it is installed.
pub const GRACE_PERIOD: Duration = Duration::hours(1);

/// Pause between a successful replacement and process exit.
pub const RESTART_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// Whether a release published at `published_at` is younger than `grace` at `now`.
pub fn is_within_grace(published_at: DateTime<Utc>, now: DateTime<Utc>, grace: Duration) -> bool {
    now.signed_duration_since(published_at) < grace
}

enum Decision {
    Skip(UpdateOutcome),
    Proceed(ReleaseDescriptor),
}

/// Manager for update operations.
pub struct UpdateManager {
    client: ReleaseClient,
    config: UpdateConfig,
    anchor: TrustAnchor,
    current_version: String,
    target: Option<InstallationTarget>,
}

impl UpdateManager {
    /// Create a new update manager with the user's config.
    pub fn new() -> UpdateResult<Self> {
        Self::with_config(UpdateConfig::load())
    }

    /// Create with a specific config.
    pub fn with_config(config: UpdateConfig) -> UpdateResult<Self> {
        let anchor = TrustAnchor::pinned()?.clone();
        let client = ReleaseClient::new(&config);

        Ok(Self {
            client,
            config,
            anchor,
            current_version: CURRENT_VERSION.to_string(),
            target: None,
        })
    }

    /// Override the version compared against the latest release.
    pub fn with_current_version(mut self, version: impl Into<String>) -> Self {
        self.current_version = version.into();
        self
    }

    /// Replace a specific executable instead of the running one.
    pub fn with_target(mut self, target: InstallationTarget) -> Self {
        self.target = Some(target);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_trust_anchor(mut self, anchor: TrustAnchor) -> Self {
        self.anchor = anchor;
        self
    }

    /// Get the current configuration.
    pub fn config(&self) -> &UpdateConfig {
        &self.config
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    fn target(&self) -> UpdateResult<InstallationTarget> {
        match &self.target {
            Some(target) => Ok(target.clone()),
            None => InstallationTarget::detect(self.config.install_dir.as_deref()),
        }
    }

    async fn decide(&self) -> Decision {
        transition(UpdateState::CheckingRemote);
        let Some(release) = self.client.check_latest().await else {
            transition(UpdateState::Idle);
            return Decision::Skip(UpdateOutcome::Unavailable);
        };

        transition(UpdateState::Deciding);
        if compare_to_release(&self.current_version, release.version()) != VersionComparison::Older
        {
            transition(UpdateState::Idle);
            return Decision::Skip(UpdateOutcome::UpToDate {
                current: self.current_version.clone(),
                latest: release.version().to_string(),
            });
        }

        if is_within_grace(release.published_at(), Utc::now(), GRACE_PERIOD) {
            transition(UpdateState::Idle);
            return Decision::Skip(UpdateOutcome::Deferred {
                version: release.version().to_string(),
                published_at: release.published_at(),
            });
        }

        Decision::Proceed(release)
    }

    /// Check for a newer release without touching the filesystem.
    pub async fn check(&self) -> UpdateOutcome {
        match self.decide().await {
            Decision::Skip(outcome) => outcome,
            Decision::Proceed(release) => {
                transition(UpdateState::Idle);
                UpdateOutcome::Available {
                    current: self.current_version.clone(),
                    latest: release.version().to_string(),
                }
            }
        }
    }

    /// Run one update attempt up to, but not including, the restart.
    pub async fn run(&self) -> UpdateResult<UpdateOutcome> {
        self.run_locked().await.map(|(outcome, _lock)| outcome)
    }

    async fn run_locked(&self) -> UpdateResult<(UpdateOutcome, Option<UpdateLock>)> {
        if !self.config.is_enabled() {
            transition(UpdateState::Idle);
            return Ok((UpdateOutcome::Disabled, None));
        }

        let release = match self.decide().await {
            Decision::Skip(outcome) => return Ok((outcome, None)),
            Decision::Proceed(release) => release,
        };

        if self.config.mode == UpdateMode::Notify {
            transition(UpdateState::Idle);
            return Ok((
                UpdateOutcome::Available {
                    current: self.current_version.clone(),
                    latest: release.version().to_string(),
                },
                None,
            ));
        }

        let target = self.target()?;
        target.check_write_permission()?;
        let lock = UpdateLock::acquire(target.install_dir())?;

        match self.apply(&release, &target).await {
            Ok(outcome) => Ok((outcome, Some(lock))),
            Err(e) => {
                transition(UpdateState::Aborted);
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        release: &ReleaseDescriptor,
        target: &InstallationTarget,
    ) -> UpdateResult<UpdateOutcome> {
        tracing::info!(
            from = %self.current_version,
            to = %release.version(),
            "Downloading update"
        );

        transition(UpdateState::Downloading);
        let archive = self.client.download(release.download_url()).await?;
        let archive_path = target.install_dir().join(STAGING_ARCHIVE);
        tokio::fs::write(&archive_path, &archive).await?;

        transition(UpdateState::Verifying);
        let manifest = self.client.download_text(release.checksum_url()).await?;
        let signature = self.client.download_text(release.signature_url()).await?;
        tokio::fs::write(target.install_dir().join(STAGING_SIGNATURE), &signature).await?;
        let artifact =
            IntegrityVerifier::new(&self.anchor).verify(&archive_path, archive, &manifest, &signature)?;

        transition(UpdateState::Staging);
        let staged = stage_archive(Cursor::new(artifact.data().clone()), target.install_dir())?;

        transition(UpdateState::Replacing);
        let files = target.replace_with(staged)?;
        tracing::info!(
            version = %release.version(),
            files = files.len(),
            backup = %target.backup().display(),
            "Installed update"
        );

        Ok(UpdateOutcome::Applied {
            from: self.current_version.clone(),
            to: release.version().to_string(),
        })
    }

    /// Host entry point: run one attempt, log the result, and exit the process
    /// with status 0 after a successful replacement.
    ///
    /// Only [`UpdateError::InstallInterrupted`] is returned as an error.
    pub async fn check_and_apply(&self) -> UpdateResult<()> {
        match self.run_locked().await {
            Ok((outcome @ UpdateOutcome::Applied { .. }, lock)) => {
                tracing::info!("{}, restarting", outcome);
                transition(UpdateState::Restarting);
                tokio::time::sleep(RESTART_DELAY).await;
                drop(lock);
                std::process::exit(0);
            }
            Ok((outcome, _)) => {
                tracing::info!("{}", outcome);
                Ok(())
            }
            Err(e) if e.is_critical() => {
                tracing::error!("Update left the installation incomplete: {}", e);
                Err(e)
            }
            Err(e) => {
                report_abort(&e);
                Ok(())
            }
        }
    }
}

fn report_abort(error: &UpdateError) {
    match error {
        UpdateError::NotFound { url } => tracing::error!(
            url = %url,
            "Release artifact is missing (404); it may not be published for this platform yet"
        ),
        UpdateError::AlreadyRunning { .. } => tracing::info!("{}", error),
        _ => tracing::error!(kind = %error.kind(), "Update aborted: {}", error),
    }
}
