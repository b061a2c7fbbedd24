//! Update configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DOWNLOAD_BASE_URL, PRODUCT_NAME, RELEASE_API_URL};

/// Update behavior mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Check and apply updates
    #[default]
    Auto,
    /// Only log that an update is available
    Notify,
    /// Completely disabled
    Disabled,
}

impl UpdateMode {
    /// Get the mode as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Notify => "notify",
            Self::Disabled => "disabled",
        }
    }
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User configuration for updates.
///
/// The signing key is intentionally not part of this struct; it is compiled
/// into the binary (see [`crate::TrustAnchor`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Update behavior mode
    #[serde(default)]
    pub mode: UpdateMode,

    /// Release metadata endpoint (GitHub "latest release" shaped JSON)
    #[serde(default = "default_release_url")]
    pub release_url: String,

    /// Base URL that versioned release artifacts live under
    #[serde(default = "default_download_base_url")]
    pub download_base_url: String,

    /// Product name used in artifact file names
    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// TCP connect timeout for every request (default: 10)
    #[serde(default = "default_10")]
    pub connect_timeout_secs: u64,

    /// Overall timeout for every request (default: 300)
    #[serde(default = "default_300")]
    pub request_timeout_secs: u64,

    /// Directory the archive is extracted into (default: the executable's directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,
}

fn default_release_url() -> String {
    RELEASE_API_URL.to_string()
}

fn default_download_base_url() -> String {
    DOWNLOAD_BASE_URL.to_string()
}

fn default_product_name() -> String {
    PRODUCT_NAME.to_string()
}

fn default_10() -> u64 {
    10
}

fn default_300() -> u64 {
    300
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            mode: UpdateMode::Auto,
            release_url: default_release_url(),
            download_base_url: default_download_base_url(),
            product_name: default_product_name(),
            connect_timeout_secs: 10,
            request_timeout_secs: 300,
            install_dir: None,
        }
    }
}

impl UpdateConfig {
    /// Path of the config file (~/.relaynode/update.json).
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".relaynode").join("update.json"))
    }

    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        match Self::config_path().filter(|p| p.exists()) {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load config from a specific file, falling back to defaults.
    pub fn load_from(path: &std::path::Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to read update config: {}", e);
                return Self::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring malformed update config: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = Self::config_path().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "No home directory")
        })?;
        self.save_to(&config_path)
    }

    /// Save config to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Check if update checks are enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.mode != UpdateMode::Disabled
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
