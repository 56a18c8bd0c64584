//! Node keys and identity recovery (secp256k1).
//!
//! An identity is the 33-byte compressed SEC1 public key of a node. A
//! registration signature is 65 bytes `r || s || v` over
//! `keccak256(message)`, where `message` is the hub identity being
//! registered with.
//!
//! Accepted recovery ids: `0`/`1`, the legacy `27`/`28`, and chain-tagged
//! values `>= 35` (`v = 35 + 2 * chain_id + parity`).

use commhub_types::serde_compat::trim_hex_prefix;
use commhub_types::{HubError, HubResult, Identity};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of a recoverable signature: r (32) + s (32) + v (1).
pub const SIGNATURE_LEN: usize = 65;

/// Length of a compressed public key, i.e. of an identity.
pub const IDENTITY_LEN: usize = 33;

/// Why a signature did not yield an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoverError {
    /// The bytes are not a well-formed recoverable signature.
    #[error("Malformed signature: {0}")]
    Malformed(String),
    /// Well-formed, but no public key can be recovered from it.
    #[error("Unrecoverable signature: {0}")]
    Unrecoverable(String),
}

/// Keccak-256 digest.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// A node's secret key.
pub struct NodeKey {
    signing_key: SigningKey,
}

impl NodeKey {
    /// Fresh random key.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Key from 32 secret bytes.
    pub fn from_bytes(bytes: &[u8]) -> HubResult<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| HubError::InvalidKey(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Key from hex (optional `0x` prefix, surrounding whitespace ignored).
    pub fn from_hex(s: &str) -> HubResult<Self> {
        let bytes = hex::decode(trim_hex_prefix(s.trim()))
            .map_err(|e| HubError::InvalidKey(e.to_string()))?;
        let bytes = Zeroizing::new(bytes);
        Self::from_bytes(&bytes)
    }

    /// Read a hex key file.
    pub fn load(path: &Path) -> HubResult<Self> {
        let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            HubError::InvalidKey(format!("cannot read {}: {e}", path.display()))
        })?);
        Self::from_hex(&contents)
    }

    /// Hex of the secret bytes.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.signing_key.to_bytes()))
    }

    /// Compressed public key as an identity.
    pub fn identity(&self) -> Identity {
        let point = self.signing_key.verifying_key().to_encoded_point(true);
        Identity::from_bytes(point.as_bytes().to_vec())
    }

    /// Recoverable signature over `keccak256(data)`, `v` in `{0, 1}`.
    pub fn sign(&self, data: &[u8]) -> HubResult<Vec<u8>> {
        let digest = keccak256(data);
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| HubError::InvalidKey(format!("signing failed: {e}")))?;
        let mut out = Vec::with_capacity(SIGNATURE_LEN);
        out.extend_from_slice(&signature.to_bytes());
        out.push(recovery_id.to_byte());
        Ok(out)
    }
}

impl std::fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKey")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}

fn parse_recovery_id(v: u8) -> Result<RecoveryId, RecoverError> {
    let parity = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        35..=u8::MAX => (v - 35) % 2,
        _ => {
            return Err(RecoverError::Malformed(format!(
                "invalid recovery id {v}"
            )))
        }
    };
    RecoveryId::from_byte(parity)
        .ok_or_else(|| RecoverError::Malformed(format!("invalid recovery id {v}")))
}

/// Recover the identity that produced `signature` over `data`.
pub fn recover_identity(data: &[u8], signature: &[u8]) -> Result<Identity, RecoverError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(RecoverError::Malformed(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    let recovery_id = parse_recovery_id(signature[64])?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|_| RecoverError::Malformed("r or s out of range".to_string()))?;

    let digest = keccak256(data);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recovery_id)
        .map_err(|_| RecoverError::Unrecoverable("no public key for signature".to_string()))?;
    Ok(Identity::from_bytes(
        key.to_encoded_point(true).as_bytes().to_vec(),
    ))
}
