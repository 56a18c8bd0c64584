//! HubClient: the client side of the hub protocol.
//!
//! One [`HubClient`] owns one TCP connection. Unary calls can be repeated
//! freely; [`HubClient::communicate`] consumes the client and turns the
//! connection into a [`ClientStream`].

use crate::error::WireError;
use crate::message::*;
use commhub_types::config::DEFAULT_MAX_FRAME_SIZE;
use commhub_types::{Identity, InboundFrame, RegistrationOutcome};
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Reply to a `register` call.
#[derive(Debug, Clone)]
pub struct RegisterReply {
    /// True only for an accepted registration.
    pub result: bool,
    pub outcome: RegistrationOutcome,
}

/// A connection to a hub, before any stream is opened.
pub struct HubClient {
    addr: SocketAddr,
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    max_frame_size: u32,
}

impl HubClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self, WireError> {
        debug!("hub client: connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();
        Ok(Self {
            addr,
            reader,
            writer,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Fetch the hub's identity.
    pub async fn get_identity(&mut self) -> Result<Identity, WireError> {
        match self.call(HubRequest::GetIdentity).await? {
            HubResponse::Identity { id } => Ok(id),
            other => Err(unexpected("get_identity", &other)),
        }
    }

    /// Register with a signature over the hub's identity bytes.
    pub async fn register(&mut self, signature: &[u8]) -> Result<RegisterReply, WireError> {
        let request = HubRequest::Register {
            signature: signature.to_vec(),
        };
        match self.call(request).await? {
            HubResponse::Registered { result, outcome } => Ok(RegisterReply { result, outcome }),
            other => Err(unexpected("register", &other)),
        }
    }

    /// Open the bidirectional stream. The connection is dedicated to it from
    /// here on.
    pub async fn communicate(mut self) -> Result<ClientStream, WireError> {
        let session = match self.call(HubRequest::Communicate).await? {
            HubResponse::StreamAccepted { session } => session,
            other => return Err(unexpected("communicate", &other)),
        };
        debug!("hub client: stream {} open on {}", session, self.addr);
        Ok(ClientStream {
            session,
            sender: StreamSender {
                writer: self.writer,
            },
            receiver: StreamReceiver {
                reader: self.reader,
                max_frame_size: self.max_frame_size,
            },
        })
    }

    async fn call(&mut self, request: HubRequest) -> Result<HubResponse, WireError> {
        let msg = HubMessage::request(request);
        write_message(&mut self.writer, &msg).await?;
        let reply = read_message(&mut self.reader, self.max_frame_size).await?;
        match reply.kind {
            HubMessageKind::Response(HubResponse::Error { code, message }) => {
                Err(WireError::Remote { code, message })
            }
            HubMessageKind::Response(response) if reply.id == msg.id => Ok(response),
            HubMessageKind::Response(_) => Err(WireError::Protocol(format!(
                "response {} does not match request {}",
                reply.id, msg.id
            ))),
            _ => Err(WireError::Protocol(
                "expected a response to a unary request".into(),
            )),
        }
    }
}

fn unexpected(call: &str, response: &HubResponse) -> WireError {
    WireError::Protocol(format!("unexpected reply to {call}: {response:?}"))
}

/// An open `communicate` stream.
pub struct ClientStream {
    session: u64,
    sender: StreamSender,
    receiver: StreamReceiver,
}

impl ClientStream {
    /// Session id assigned by the hub.
    pub fn session(&self) -> u64 {
        self.session
    }

    pub async fn send(&mut self, target: &[u8], payload: &[u8]) -> Result<(), WireError> {
        self.sender.send(target, payload).await
    }

    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        self.receiver.recv().await
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (StreamSender, StreamReceiver) {
        (self.sender, self.receiver)
    }
}

/// Sending half of a stream: inbound frames toward the peer network.
pub struct StreamSender {
    writer: OwnedWriteHalf,
}

impl StreamSender {
    pub async fn send(&mut self, target: &[u8], payload: &[u8]) -> Result<(), WireError> {
        let msg = HubMessage::inbound(InboundFrame::new(target, payload));
        write_message(&mut self.writer, &msg).await
    }

    /// End the inbound direction. The hub ends the session on seeing EOF.
    pub async fn close(mut self) -> Result<(), WireError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

/// Receiving half of a stream: outbound payloads from the peer network.
pub struct StreamReceiver {
    reader: OwnedReadHalf,
    max_frame_size: u32,
}

impl StreamReceiver {
    /// Next outbound payload, or `None` once the hub closed the stream.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, WireError> {
        let msg = match read_message(&mut self.reader, self.max_frame_size).await {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(None),
            Err(e) => return Err(e),
        };
        match msg.kind {
            HubMessageKind::Stream(StreamFrame::Outbound(frame)) => Ok(Some(frame.payload)),
            HubMessageKind::Response(HubResponse::Error { code, message }) => {
                Err(WireError::Remote { code, message })
            }
            _ => Err(WireError::Protocol(format!(
                "unexpected message {} on open stream",
                msg.id
            ))),
        }
    }
}
