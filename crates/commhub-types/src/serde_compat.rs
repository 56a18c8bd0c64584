//! Serde helpers for byte fields on the wire.
//!
//! JSON has no byte type, so identities, signatures and payloads travel as
//! lowercase hex strings. Decoding accepts either case and an optional `0x`
//! prefix, since clients commonly render keys that way.

use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;
use std::fmt;

/// Strip an optional `0x`/`0X` prefix.
pub fn trim_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// `#[serde(with = "hex_bytes")]` for `Vec<u8>` fields.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HexVisitor;

        impl<'de> Visitor<'de> for HexVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a hex-encoded byte string")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                hex::decode(trim_hex_prefix(v)).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}
