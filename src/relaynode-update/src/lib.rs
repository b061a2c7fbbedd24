//! Relaynode Update - signed self-update pipeline for the relaynode executable
//!
//! One update attempt runs strictly in sequence:
//! - fetch the latest release metadata and compare versions
//! - skip releases younger than the grace window
//! - download the platform archive, its SHA-512 manifest and detached signature
//! - verify both against the compiled-in trust anchor
//! - stage the archive, move the running executable to `<name>.old`, commit
//! - exit so a supervisor restarts the new binary
//!
//! # Example
//!
//! ```rust,ignore
//! use relaynode_update::UpdateManager;
//!
//! let manager = UpdateManager::new()?;
//!
//! // Logs the outcome; exits the process after a successful replacement.
//! manager.check_and_apply().await?;
//! ```

mod api;
mod config;
mod error;
mod extract;
mod install;
mod lock;
mod manager;
mod platform;
mod trust;
mod verify;
mod version;

pub use api::{LatestRelease, ReleaseClient, ReleaseDescriptor, ReleaseLayout, parse_published_at};
pub use config::{UpdateConfig, UpdateMode};
pub use error::{ErrorKind, UpdateError, UpdateResult};
pub use extract::{StagedTree, extract_zip, sanitize_entry_name, stage_archive, stage_archive_file};
pub use install::InstallationTarget;
pub use lock::UpdateLock;
pub use manager::{GRACE_PERIOD, RESTART_DELAY, UpdateManager, UpdateOutcome, UpdateState, is_within_grace};
pub use platform::{Platform, arch_identifier, os_identifier};
pub use trust::{PINNED_KEY_ID, PINNED_PUBLIC_KEY, SignerIdentity, TrustAnchor, key_id_hex};
pub use verify::{IntegrityVerifier, VerifiedArtifact, manifest_lists_digest, sha512_hex, verify_checksum};
pub use version::{VersionComparison, compare_to_release, compare_versions, normalize_tag};

/// Current version of relaynode (set at compile time)
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default release metadata endpoint
pub const RELEASE_API_URL: &str = "https://api.github.com/repos/relaynode/relaynode/releases/latest";

/// Default base URL of versioned release artifacts
pub const DOWNLOAD_BASE_URL: &str = "https://github.com/relaynode/relaynode/releases/download";

/// Product name used in artifact file names
pub const PRODUCT_NAME: &str = "RelayNode";

/// File name the downloaded archive is persisted under, inside the install directory
pub const STAGING_ARCHIVE: &str = "update.zip";

/// File name the detached signature is persisted under, inside the install directory
pub const STAGING_SIGNATURE: &str = "update.zip.asc";
