//! Error types for relaynode-update.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for update operations.
pub type UpdateResult<T> = std::result::Result<T, UpdateError>;

/// Broad failure category, used for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or HTTP failure, including an explicit 404.
    TransportFailure,
    /// Release metadata could not be understood.
    ParseFailure,
    /// Archive digest is not listed in the checksum manifest.
    ChecksumMismatch,
    /// Detached signature did not verify against the trust anchor.
    SignatureInvalid,
    /// Local filesystem operation failed.
    FilesystemFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::TransportFailure => "transport failure",
            Self::ParseFailure => "parse failure",
            Self::ChecksumMismatch => "checksum mismatch",
            Self::SignatureInvalid => "signature invalid",
            Self::FilesystemFailure => "filesystem failure",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during update operations.
#[derive(Debug, Error)]
pub enum UpdateError {
    // Network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to connect to release server: {message}")]
    ConnectionFailed { message: String },

    #[error("Release server returned error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("File not found on release server (404): {url}")]
    NotFound { url: String },

    // Metadata errors
    #[error("Invalid release metadata: {message}")]
    InvalidMetadata { message: String },

    #[error("Invalid publish timestamp '{value}'")]
    InvalidTimestamp { value: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Verification errors
    #[error("SHA512 {actual} is not listed in the checksum manifest")]
    ChecksumMismatch { actual: String },

    #[error("Signature verification failed: {reason}")]
    SignatureInvalid { reason: String },

    #[error("Signature was made by unknown key {key_id}")]
    UnknownSigner { key_id: String },

    #[error("Signing key id {actual} does not match pinned key id {expected}")]
    WrongKeyId { expected: String, actual: String },

    #[error("Embedded trust anchor is unusable: {reason}")]
    InvalidTrustAnchor { reason: String },

    // Installation errors
    #[error("Failed to extract archive: {message}")]
    ExtractionFailed { message: String },

    #[error("Archive entry escapes the destination directory: {name}")]
    UnsafeArchivePath { name: String },

    #[error("Binary replacement failed: {message}")]
    ReplaceFailed { message: String },

    #[error(
        "Update interrupted after {} was moved to {}: {message}",
        .current.display(),
        .backup.display()
    )]
    InstallInterrupted {
        current: PathBuf,
        backup: PathBuf,
        message: String,
    },

    #[error("Could not locate the running executable: {message}")]
    ExecutableNotFound { message: String },

    #[error("Permission denied: cannot write to {}", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("Another update is already running (lock held on {})", .path.display())]
    AlreadyRunning { path: PathBuf },

    // File system errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for UpdateError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => Self::Io(e),
            other => Self::ExtractionFailed {
                message: other.to_string(),
            },
        }
    }
}

impl UpdateError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_)
            | Self::ConnectionFailed { .. }
            | Self::ServerError { .. }
            | Self::NotFound { .. } => ErrorKind::TransportFailure,
            Self::InvalidMetadata { .. } | Self::InvalidTimestamp { .. } | Self::Json(_) => {
                ErrorKind::ParseFailure
            }
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::SignatureInvalid { .. }
            | Self::UnknownSigner { .. }
            | Self::WrongKeyId { .. }
            | Self::InvalidTrustAnchor { .. } => ErrorKind::SignatureInvalid,
            Self::ExtractionFailed { .. }
            | Self::UnsafeArchivePath { .. }
            | Self::ReplaceFailed { .. }
            | Self::InstallInterrupted { .. }
            | Self::ExecutableNotFound { .. }
            | Self::PermissionDenied { .. }
            | Self::AlreadyRunning { .. }
            | Self::Io(_) => ErrorKind::FilesystemFailure,
        }
    }

    /// Check if this error is a network error.
    pub fn is_network_error(&self) -> bool {
        self.kind() == ErrorKind::TransportFailure
    }

    /// Check if this error left the installation without a binary at its
    /// original path. The host should treat it as fatal.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::InstallInterrupted { .. })
    }
}
