//! Stream frames exchanged during a `communicate` session.

use crate::serde_compat::hex_bytes;
use serde::{Deserialize, Serialize};

/// A unit of data the client wants forwarded toward `target_identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Raw identity bytes of the destination node.
    #[serde(with = "hex_bytes")]
    pub target_identity: Vec<u8>,
    /// Opaque payload.
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

impl InboundFrame {
    pub fn new(target_identity: impl Into<Vec<u8>>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            target_identity: target_identity.into(),
            payload: payload.into(),
        }
    }

    /// Routing key handed to the peer subsystem.
    pub fn target_hex(&self) -> String {
        hex::encode(&self.target_identity)
    }
}

/// A unit of data the peer subsystem wants delivered to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

impl OutboundFrame {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_target_hex() {
        let frame = InboundFrame::new(vec![0x03, 0x1f], b"ping".to_vec());
        assert_eq!(frame.target_hex(), "031f");
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"target_identity":"031f","payload":"70696e67"}"#);
    }
}
