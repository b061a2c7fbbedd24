//! Integrity gates for downloaded release archives.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha512};

use crate::error::{UpdateError, UpdateResult};
use crate::trust::TrustAnchor;

/// Hex-encoded SHA-512 of `data`.
pub fn sha512_hex(data: &[u8]) -> String {
    hex::encode(Sha512::digest(data))
}

/// Check whether `manifest` lists `digest` as one of its whitespace-separated tokens.
pub fn manifest_lists_digest(manifest: &str, digest: &str) -> bool {
    manifest
        .split_whitespace()
        .any(|token| token.eq_ignore_ascii_case(digest))
}

/// Checksum gate: the SHA-512 of `data` must appear in `manifest`.
///
/// Returns the computed digest.
pub fn verify_checksum(data: &[u8], manifest: &str) -> UpdateResult<String> {
    let actual = sha512_hex(data);

    if !manifest_lists_digest(manifest, &actual) {
        return Err(UpdateError::ChecksumMismatch { actual });
    }

    Ok(actual)
}

/// An archive that passed both the checksum and the signature gate.
///
/// Only [`IntegrityVerifier::verify`] can construct one.
#[derive(Debug, Clone)]
pub struct VerifiedArtifact {
    local_path: PathBuf,
    digest_hex: String,
    signer_key_id: String,
    data: Bytes,
}

impl VerifiedArtifact {
    /// Where the archive was persisted.
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn digest_hex(&self) -> &str {
        &self.digest_hex
    }

    pub fn signer_key_id(&self) -> &str {
        &self.signer_key_id
    }

    /// The exact bytes that were verified.
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// Runs the checksum gate, then the signature gate.
pub struct IntegrityVerifier<'a> {
    anchor: &'a TrustAnchor,
}

impl<'a> IntegrityVerifier<'a> {
    pub fn new(anchor: &'a TrustAnchor) -> Self {
        Self { anchor }
    }

    /// Verify downloaded archive bytes against the manifest and detached signature.
    pub fn verify(
        &self,
        local_path: &Path,
        data: Bytes,
        manifest: &str,
        armored_signature: &str,
    ) -> UpdateResult<VerifiedArtifact> {
        let digest_hex = verify_checksum(&data, manifest)?;
        tracing::debug!(sha512 = %digest_hex, "Checksum gate passed");

        let signer = self.anchor.verify(&data, armored_signature)?;
        tracing::info!(key_id = %signer.key_id, "Signature gate passed");

        Ok(VerifiedArtifact {
            local_path: local_path.to_path_buf(),
            digest_hex,
            signer_key_id: signer.key_id,
            data,
        })
    }
}
