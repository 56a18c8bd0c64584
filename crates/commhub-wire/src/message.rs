//! Wire protocol message types and framing.
//!
//! All communication between a client and the hub uses JSON-framed messages
//! over TCP. Each message is prefixed with a 4-byte big-endian length header.
//! Byte fields travel as lowercase hex strings.

use crate::error::WireError;
use commhub_types::serde_compat::hex_bytes;
use commhub_types::{Identity, InboundFrame, OutboundFrame, RegistrationOutcome};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Error code for requests that are invalid in the current connection state.
pub const CODE_BAD_REQUEST: i32 = 400;
/// Error code sent to connections dropped because the hub is stopping.
pub const CODE_SHUTTING_DOWN: i32 = 503;

/// A wire protocol message (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubMessage {
    /// Message ID. Responses echo the ID of their request.
    pub id: String,
    /// Message variant.
    #[serde(flatten)]
    pub kind: HubMessageKind,
}

/// The different kinds of wire messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HubMessageKind {
    /// Unary request from the client.
    #[serde(rename = "request")]
    Request(HubRequest),
    /// Response from the hub.
    #[serde(rename = "response")]
    Response(HubResponse),
    /// Frame of an open `communicate` stream (either direction).
    #[serde(rename = "stream")]
    Stream(StreamFrame),
}

/// Request messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum HubRequest {
    /// Ask for the hub's identity.
    #[serde(rename = "get_identity")]
    GetIdentity,
    /// Bind a remote identity: `signature` is over the hub identity.
    #[serde(rename = "register")]
    Register {
        #[serde(with = "hex_bytes")]
        signature: Vec<u8>,
    },
    /// Turn this connection into a bidirectional stream.
    #[serde(rename = "communicate")]
    Communicate,
}

/// Response messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum HubResponse {
    #[serde(rename = "identity")]
    Identity { id: Identity },
    /// `result` is true only when `outcome` is accepted.
    #[serde(rename = "registered")]
    Registered {
        result: bool,
        outcome: RegistrationOutcome,
    },
    /// The stream is open; outbound frames may follow.
    #[serde(rename = "stream_accepted")]
    StreamAccepted { session: u64 },
    #[serde(rename = "error")]
    Error { code: i32, message: String },
}

/// Frames of an open stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame")]
pub enum StreamFrame {
    /// Client → hub: forward toward a peer.
    #[serde(rename = "inbound")]
    Inbound(InboundFrame),
    /// Hub → client: delivered by the peer subsystem.
    #[serde(rename = "outbound")]
    Outbound(OutboundFrame),
}

impl HubMessage {
    /// A new request with a fresh message ID.
    pub fn request(request: HubRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: HubMessageKind::Request(request),
        }
    }

    /// A response echoing `id`.
    pub fn response(id: impl Into<String>, response: HubResponse) -> Self {
        Self {
            id: id.into(),
            kind: HubMessageKind::Response(response),
        }
    }

    pub fn error(id: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::response(
            id,
            HubResponse::Error {
                code,
                message: message.into(),
            },
        )
    }

    pub fn inbound(frame: InboundFrame) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: HubMessageKind::Stream(StreamFrame::Inbound(frame)),
        }
    }

    pub fn outbound(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            kind: HubMessageKind::Stream(StreamFrame::Outbound(OutboundFrame::new(payload))),
        }
    }
}

/// Encode a wire message to bytes (4-byte big-endian length + JSON).
pub fn encode_message(msg: &HubMessage) -> Result<Vec<u8>, WireError> {
    encode_frame(msg, u32::MAX)
}

/// Encode a wire message, refusing bodies longer than `max_size` bytes.
pub fn encode_frame(msg: &HubMessage, max_size: u32) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(msg)?;
    let len = match u32::try_from(json.len()) {
        Ok(len) if len <= max_size => len,
        _ => {
            return Err(WireError::MessageTooLarge {
                size: json.len(),
                max: max_size,
            })
        }
    };
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_length(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Parse a JSON body into a HubMessage.
pub fn decode_message(body: &[u8]) -> Result<HubMessage, serde_json::Error> {
    serde_json::from_slice(body)
}

/// Write a framed message (4-byte length + JSON).
pub async fn write_message<W>(writer: &mut W, msg: &HubMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_message(msg)?;
    write_frame(writer, &bytes).await
}

/// Write bytes already produced by [`encode_frame`].
pub async fn write_frame<W>(writer: &mut W, bytes: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON).
///
/// A clean EOF before the header maps to [`WireError::ConnectionClosed`];
/// a header announcing more than `max_size` bytes is rejected before the
/// body is allocated.
pub async fn read_message<R>(reader: &mut R, max_size: u32) -> Result<HubMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > max_size {
        return Err(WireError::MessageTooLarge {
            size: len as usize,
            max: max_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    let msg = decode_message(&body)?;
    Ok(msg)
}
