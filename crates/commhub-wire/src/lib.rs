//! CommHub wire protocol: a streaming bridge between RPC clients and a
//! peer-to-peer messaging subsystem.
//!
//! A client learns the hub's identity, registers its own identity with a
//! signature over it, then opens one long-lived `communicate` stream that
//! carries inbound frames toward the peer network and outbound frames back.
//!
//! ## Architecture
//!
//! - **HubServer**: TCP listener, accept loop and graceful shutdown
//! - **IdentityHandshake**: `get_identity` / `register`
//! - **StreamBridge**: one bidirectional session wired to the peer subsystem
//! - **SessionTable**: live sessions and outbound routing
//! - **PeerSubsystem**: trait boundary to the peer network
//! - **HubMessage**: JSON messages framed with a 4-byte length prefix
//! - **HubClient**: client side of the protocol

pub mod bridge;
pub mod client;
pub mod error;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod server;
pub mod session;

pub use bridge::{SessionEnd, StreamBridge};
pub use client::{ClientStream, HubClient, RegisterReply, StreamReceiver, StreamSender};
pub use error::WireError;
pub use handshake::IdentityHandshake;
pub use message::{HubMessage, HubMessageKind, HubRequest, HubResponse, StreamFrame};
pub use peer::{OutboundSink, PeerSubsystem};
pub use server::{Hub, HubServer};
pub use session::{Delivery, SessionId, SessionSink, SessionTable};
