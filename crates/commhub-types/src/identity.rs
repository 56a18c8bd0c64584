//! Node identities and registration outcomes.

use crate::serde_compat::trim_hex_prefix;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque, public-key-derived identifier of a node.
///
/// Immutable once assigned. Rendered as lowercase hex everywhere it leaves
/// the process (wire, logs, peer routing keys).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(Vec<u8>);

impl Identity {
    /// Wrap raw identity bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a hex-encoded identity (optional `0x` prefix, any case).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(trim_hex_prefix(s.trim())).map(Self)
    }

    /// The raw identity bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering, used as the routing key.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_hex())
    }
}

impl From<Vec<u8>> for Identity {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identity::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Result of binding a remote identity with a signed registration.
///
/// Only [`RegistrationOutcome::Accepted`] counts as success; the two failure
/// variants separate "could not even parse the signature" from "parsed, but
/// no usable public key comes out of it".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RegistrationOutcome {
    /// The signature recovered `identity`, which is now registered.
    Accepted { identity: Identity },
    /// The signature bytes are structurally invalid.
    Malformed { reason: String },
    /// The signature is well-formed but recovers no usable identity.
    Unrecoverable { reason: String },
}

impl RegistrationOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The registered identity, if accepted.
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Accepted { identity } => Some(identity),
            _ => None,
        }
    }

    /// Short machine-readable label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Malformed { .. } => "malformed",
            Self::Unrecoverable { .. } => "unrecoverable",
        }
    }
}
