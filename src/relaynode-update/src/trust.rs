//! Pinned release signing key and OpenPGP detached signature verification.
//!
//! Release archives ship with an armored detached signature
//! (`-----BEGIN PGP SIGNATURE-----`). A signature is accepted only when it
//! was made by the pinned key or one of its bound signing subkeys, and the
//! primary key carries the pinned key id.

use once_cell::sync::OnceCell;
use pgp::composed::{Deserializable, DetachedSignature, SignedPublicKey};
use pgp::types::{KeyDetails, KeyId};

use crate::error::{UpdateError, UpdateResult};

/// Release signing key compiled into the binary.
pub const PINNED_PUBLIC_KEY: &str = r"-----BEGIN PGP PUBLIC KEY BLOCK-----

mQINBGRVILgBEACxqkRKodS2Mfxn6GTYvUDaBSgQCjT/GMqmto38buSing9PCXv6
QMWko8Ax7cKVkxEKGD+4T+AD2mLfhpjLBlMOcxqBwuJ4YVsWkHH2TLHc/gU3DL9Y
ajH9Lt8TF+Xin/pBfGdOBXGeKK2Az8RshK5D3w3E89//plL15kaR0BWbVIp6Ne0P
c5D7BNboRuqJGAY+aYEipWAHLZW5M2dD1wgVjUpZRwWv+qIKuQ+hri+fxehFjz3S
8ElwqZu8JQHxcO3b3m3j11x1qfekqRvNf/dxMpuS+ymenAjOmDDlarmSTj9RTzrA
97uYi2meIr5e85yMNk5n8Ks7HOQyQ1K6J7YBodjItO7bp1EE5xSecNsaIT2kBQX3
0+uga0IsZkA6MIC8caWfkMIXrdyLse4XFywCdOGI3BhrA6QV/7ZAXRBs5HtO6SQO
eVfDptZ0VCvmWG8v6d5mBJ6081FylHEoDYXfJVwgRo71UR334WBpRJZQNV76p383
muUSq05IcwjbAdyol26enqO2s5LRNs7OeISAhQ+u2LV6LJK+G23JKbmIuWD7Rhol
gLDXYukoIlOcY7x++qnqoLT8V1aNFE/4XDAd+/Xq7VdgvKbPZxxEkXj9LMrPBIaS
9/1Nmiq/ni779pnGCFDS7UUFLJvWjEDgWKnZb8MYBdyvq9T9biecJ2oR6wARAQAB
tCJjaGVuamlhNDA0IDxjaGVuamlhYmxvZ0BnbWFpbC5jb20+iQJXBBMBCABBFiEE
4TRiUu1mI2TKN/cWGJvnloM2naMFAmRVILgCGw8FCQPDFwgFCwkIBwICIgIGFQoJ
CAsCBBYCAwECHgcCF4AACgkQGJvnloM2naMQJA/+OxZGpywGLf+C1Wi9iVsSb0UA
Xit9yOujEpgttgJBdZcfP/1W5G7Vlt9pEH1ByJ28RHlSrEdMkycYhmvnDPdCTg+c
x3NtjWP8xWXsWN9upPPnn3ZdtsSDZ2YQOMjunP7mucRW8NofDFytPFgSVb6+NcqM
9Obcd6gmOY3qoQcv4XofdlP6ObFZxvr/mGKdSBgWgOQivGK8QtimNeC/V5ChJKyl
rueQJ1RRnGtlTXW3tNPNmYkXeVR/TVZgVHyIBHjlNHRV7V8Wgm+vsNIo7xPD/PHL
3Kq2pmuz8EpcJpNK1+IYsQJTEx9+Y4E4Vjjp/U6WBjGDWXF5KrdTKMsRsHvhxOW7
C/u6e9gG/eHPLo5Pw3Dg5MWZh/+dRZ/1kWoKhabp719CCPOh9SBgUdSc8RAoVTwp
b/UHSPokJPPlpBWU7mdBJ+fCapswHU8Gg4WnwBrm2C+p7GEXZiJ6f5n2Ic9rVu6x
mkmOANLziPe7kC8T6830d0l2nlyCR/oKoGrQ8+bQNChHHhGWtr4O/uCrES5NK/Xr
kT6OojW8UeV5ngFa0fFurYcMahHHaoy/S3bduGMk3yiFI8Wh7LkZQO6ugkoesvqv
YSCJJrSTjHnBCkddmOHpDpvgOe+COOrVCe42PNSovTJ+14rhMTsYOWShLLOdC02L
/xTrrn8LrU9TVEUWf4I=
=l1Ub
-----END PGP PUBLIC KEY BLOCK-----
";

/// Key id the primary signing key must carry.
pub const PINNED_KEY_ID: &str = "189BE79683369DA3";

/// Format a key id as 16 uppercase hex characters.
pub fn key_id_hex(key_id: &KeyId) -> String {
    hex::encode_upper(key_id)
}

/// Who signed a release, as established by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerIdentity {
    /// Key id of the primary key the signer belongs to
    pub key_id: String,
    /// Key id of the key that produced the signature (primary or subkey)
    pub signing_key_id: String,
}

/// The one public key updates are accepted from.
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    keyring: SignedPublicKey,
    expected_key_id: String,
}

impl TrustAnchor {
    /// The anchor compiled into this binary, parsed once per process.
    pub fn pinned() -> UpdateResult<&'static TrustAnchor> {
        static PINNED: OnceCell<TrustAnchor> = OnceCell::new();
        PINNED.get_or_try_init(|| Self::from_armored(PINNED_PUBLIC_KEY, PINNED_KEY_ID))
    }

    /// Parse an armored public key block and pair it with the key id it must carry.
    pub(crate) fn from_armored(armored: &str, expected_key_id: &str) -> UpdateResult<Self> {
        let (keyring, _headers) =
            SignedPublicKey::from_string(armored).map_err(|e| UpdateError::InvalidTrustAnchor {
                reason: e.to_string(),
            })?;

        Ok(Self {
            keyring,
            expected_key_id: expected_key_id.trim().to_ascii_uppercase(),
        })
    }

    /// Key id of the primary key.
    pub fn key_id(&self) -> String {
        key_id_hex(&self.keyring.key_id())
    }

    /// Key id the signer is required to have.
    pub fn expected_key_id(&self) -> &str {
        &self.expected_key_id
    }

    /// Verify an armored detached signature over `data`.
    ///
    /// The issuing key is looked up by the signature's issuer key id or
    /// fingerprint. Signatures that name no issuer are rejected.
    pub fn verify(&self, data: &[u8], armored_signature: &str) -> UpdateResult<SignerIdentity> {
        let (detached, _headers) = DetachedSignature::from_string(armored_signature)
            .map_err(|e| malformed(&e.to_string()))?;

        if detached.signature.issuer().is_empty()
            && detached.signature.issuer_fingerprint().is_empty()
        {
            return Err(malformed("signature names no issuer"));
        }

        let primary = &self.keyring.primary_key;
        let signing_key_id = if issued_by(&detached, primary) {
            detached.verify(primary, data).map_err(mismatch)?;
            primary.key_id()
        } else if let Some(subkey) = self
            .keyring
            .public_subkeys
            .iter()
            .find(|subkey| issued_by(&detached, *subkey))
        {
            subkey
                .verify(primary)
                .map_err(|e| UpdateError::SignatureInvalid {
                    reason: format!("signing subkey is not bound to the release key: {}", e),
                })?;
            detached.verify(subkey, data).map_err(mismatch)?;
            subkey.key_id()
        } else {
            return Err(UpdateError::UnknownSigner {
                key_id: claimed_issuer(&detached),
            });
        };

        let identity = SignerIdentity {
            key_id: self.key_id(),
            signing_key_id: key_id_hex(&signing_key_id),
        };
        tracing::debug!(
            key_id = %identity.key_id,
            signing_key_id = %identity.signing_key_id,
            "Signature verified"
        );

        if identity.key_id != self.expected_key_id {
            return Err(UpdateError::WrongKeyId {
                expected: self.expected_key_id.clone(),
                actual: identity.key_id,
            });
        }

        Ok(identity)
    }
}

fn issued_by(detached: &DetachedSignature, key: &impl KeyDetails) -> bool {
    let key_id = key.key_id();
    let fingerprint = key.fingerprint();
    detached.signature.issuer().into_iter().any(|id| *id == key_id)
        || detached
            .signature
            .issuer_fingerprint()
            .into_iter()
            .any(|fp| *fp == fingerprint)
}

fn claimed_issuer(detached: &DetachedSignature) -> String {
    if let Some(id) = detached.signature.issuer().first() {
        return key_id_hex(id);
    }
    detached
        .signature
        .issuer_fingerprint()
        .first()
        .map(|fp| format!("{:X}", fp))
        .unwrap_or_default()
}

fn mismatch(err: pgp::errors::Error) -> UpdateError {
    UpdateError::SignatureInvalid {
        reason: format!("signature does not match the archive: {}", err),
    }
}

fn malformed(reason: &str) -> UpdateError {
    UpdateError::SignatureInvalid {
        reason: format!("malformed signature file: {}", reason),
    }
}
