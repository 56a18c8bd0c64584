//! StreamBridge: wires one bidirectional stream to the peer subsystem.
//!
//! On open the bridge registers a session in the [`SessionTable`], writes the
//! `stream_accepted` acknowledgement and spawns a writer task that drains the
//! session's outbound queue onto the stream. The calling task then runs the
//! receive loop: inbound frames are forwarded to the peer subsystem in the
//! order they arrive until cancellation, end of input, or an error.
//!
//! The two directions fail independently. A write failure demotes the
//! session's sink to inert and stops the writer, while the receive loop keeps
//! forwarding. A receive failure or cancellation ends the session, which
//! evicts it from the table and stops the writer.

use crate::error::WireError;
use crate::message::{
    encode_frame, read_message, write_frame, write_message, HubMessage, HubMessageKind,
    HubResponse, StreamFrame,
};
use crate::peer::PeerSubsystem;
use crate::session::{SessionId, SessionSink, SessionTable};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// How a session ended. Every variant is terminal for the stream.
#[derive(Debug)]
pub enum SessionEnd {
    /// The session's cancellation token fired (shutdown or connection drop).
    Cancelled,
    /// The client closed its sending side.
    EndOfInput,
    /// Receiving failed or the client broke the stream protocol.
    Failed(WireError),
}

impl SessionEnd {
    /// The terminal condition as an error, `None` for a clean end of input.
    pub fn into_error(self) -> Option<WireError> {
        match self {
            Self::Cancelled => Some(WireError::Cancelled),
            Self::EndOfInput => None,
            Self::Failed(e) => Some(e),
        }
    }
}

/// Runs `communicate` sessions against one peer subsystem.
#[derive(Clone)]
pub struct StreamBridge {
    peer: Arc<dyn PeerSubsystem>,
    sessions: Arc<SessionTable>,
    max_frame_size: u32,
}

impl StreamBridge {
    pub fn new(
        peer: Arc<dyn PeerSubsystem>,
        sessions: Arc<SessionTable>,
        max_frame_size: u32,
    ) -> Self {
        Self {
            peer,
            sessions,
            max_frame_size,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        &self.sessions
    }

    /// Serve one session until it ends.
    ///
    /// `request_id` is the ID of the `communicate` request, echoed in the
    /// acknowledgement. `cancel` is the connection's token; the session
    /// derives its own child token from it.
    pub async fn run<R, W>(
        &self,
        request_id: &str,
        mut reader: R,
        mut writer: W,
        cancel: CancellationToken,
    ) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let session_cancel = cancel.child_token();
        let (sink, outbound_rx) = self.sessions.open(session_cancel.clone());
        let id = sink.id();

        // Ack before the writer starts so no outbound frame can overtake it.
        let ack = HubMessage::response(request_id, HubResponse::StreamAccepted { session: id.0 });
        if let Err(e) = write_message(&mut writer, &ack).await {
            self.sessions.close(id);
            session_cancel.cancel();
            return SessionEnd::Failed(e);
        }
        debug!(session = %id, "hub: stream opened");

        let writer_task = tokio::spawn(write_outbound(
            id,
            writer,
            outbound_rx,
            Arc::clone(&sink),
            session_cancel.clone(),
            self.max_frame_size,
        ));

        let end = self.receive_loop(id, &mut reader, &session_cancel).await;

        self.sessions.close(id);
        session_cancel.cancel();
        if let Err(e) = writer_task.await {
            warn!(session = %id, error = %e, "hub: outbound writer task failed");
        }

        debug!(session = %id, end = ?end, dropped = sink.dropped(), "hub: stream closed");
        end
    }

    async fn receive_loop<R>(
        &self,
        id: SessionId,
        reader: &mut R,
        cancel: &CancellationToken,
    ) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send,
    {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                msg = read_message(&mut *reader, self.max_frame_size) => msg,
            };

            match msg {
                Ok(HubMessage {
                    kind: HubMessageKind::Stream(StreamFrame::Inbound(frame)),
                    ..
                }) => {
                    let target = frame.target_hex();
                    trace!(
                        session = %id,
                        target = %target,
                        len = frame.payload.len(),
                        "hub: forwarding inbound frame"
                    );
                    self.peer.forward_inbound(&target, frame.payload);
                }
                Ok(other) => {
                    return SessionEnd::Failed(WireError::Protocol(format!(
                        "unexpected message {} on open stream",
                        other.id
                    )));
                }
                Err(WireError::ConnectionClosed) => return SessionEnd::EndOfInput,
                Err(e) => return SessionEnd::Failed(e),
            }
        }
    }
}

/// Drain a session's outbound queue onto the stream.
async fn write_outbound<W>(
    id: SessionId,
    mut writer: W,
    mut rx: mpsc::Receiver<Vec<u8>>,
    sink: Arc<SessionSink>,
    cancel: CancellationToken,
    max_frame_size: u32,
) where
    W: AsyncWrite + Unpin + Send,
{
    let mut seq: u64 = 0;
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(p) => p,
                None => break,
            },
        };

        seq += 1;
        let len = payload.len();
        let msg = HubMessage::outbound(format!("{id}-{seq}"), payload);
        // Clients reject frames over the limit, so one oversized payload
        // would otherwise end the stream.
        let bytes = match encode_frame(&msg, max_frame_size) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session = %id, len, error = %e, "hub: dropping outbound payload");
                sink.record_dropped();
                continue;
            }
        };
        // A client that stopped reading must not pin this task past cancellation.
        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = write_frame(&mut writer, &bytes) => res,
        };
        if let Err(e) = written {
            warn!(session = %id, error = %e, "hub: unable to deliver outbound frame");
            sink.demote("write failed");
            break;
        }
    }

    // Dropping the receiver makes any racing offer demote the sink.
    drop(rx);
    if !cancel.is_cancelled() {
        let _ = writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::OutboundSink;
    use commhub_types::config::{DeliveryPolicy, DEFAULT_MAX_FRAME_SIZE};
    use commhub_types::{Identity, InboundFrame, RegistrationOutcome};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPeer {
        forwarded: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl PeerSubsystem for RecordingPeer {
        fn local_identity(&self) -> Identity {
            Identity::from_bytes(vec![0x03; 33])
        }

        fn register_remote_identity(&self, _signature: &[u8]) -> RegistrationOutcome {
            RegistrationOutcome::Unrecoverable {
                reason: "not used".to_string(),
            }
        }

        fn install_outbound(&self, _sink: Arc<dyn OutboundSink>) {}

        fn forward_inbound(&self, target_identity_hex: &str, payload: Vec<u8>) {
            self.forwarded
                .lock()
                .unwrap()
                .push((target_identity_hex.to_string(), payload));
        }
    }

    fn bridge(peer: Arc<RecordingPeer>) -> StreamBridge {
        StreamBridge::new(
            peer,
            Arc::new(SessionTable::new(DeliveryPolicy::Latest, 16)),
            DEFAULT_MAX_FRAME_SIZE,
        )
    }

    async fn expect_ack<R: AsyncRead + Unpin>(reader: &mut R) -> u64 {
        match read_message(reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap().kind {
            HubMessageKind::Response(HubResponse::StreamAccepted { session }) => session,
            other => panic!("Expected StreamAccepted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inbound_frames_forwarded_in_order() {
        let peer = Arc::new(RecordingPeer::default());
        let bridge = bridge(peer.clone());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        let task = tokio::spawn(async move {
            bridge
                .run("c-1", server_rd, server_wr, CancellationToken::new())
                .await
        });

        expect_ack(&mut client_rd).await;
        for i in 0..20u8 {
            let frame = InboundFrame::new(vec![0xaa, i], vec![i; 3]);
            write_message(&mut client_wr, &HubMessage::inbound(frame))
                .await
                .unwrap();
        }
        client_wr.shutdown().await.unwrap();

        let end = task.await.unwrap();
        assert!(matches!(end, SessionEnd::EndOfInput));

        let forwarded = peer.forwarded.lock().unwrap();
        assert_eq!(forwarded.len(), 20);
        for (i, (target, payload)) in forwarded.iter().enumerate() {
            assert_eq!(target, &format!("aa{:02x}", i));
            assert_eq!(payload, &vec![i as u8; 3]);
        }
    }

    #[tokio::test]
    async fn test_cancellation_ends_session_and_evicts() {
        let peer = Arc::new(RecordingPeer::default());
        let bridge = bridge(peer);
        let sessions = Arc::clone(bridge.sessions());

        let (client, server) = tokio::io::duplex(1024);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (mut client_rd, _client_wr) = tokio::io::split(client);

        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { bridge.run("c-2", server_rd, server_wr, cancel).await })
        };

        let session = expect_ack(&mut client_rd).await;
        assert!(sessions.contains(SessionId(session)));

        cancel.cancel();
        let end = task.await.unwrap();
        assert!(matches!(end, SessionEnd::Cancelled));
        assert!(matches!(end.into_error(), Some(WireError::Cancelled)));
        assert!(sessions.is_empty());
        // Deliveries after the session ended are silently dropped.
        assert_eq!(sessions.route(b"late".to_vec()), 0);
    }

    #[tokio::test]
    async fn test_outbound_payload_reaches_stream() {
        let peer = Arc::new(RecordingPeer::default());
        let bridge = bridge(peer);
        let sessions = Arc::clone(bridge.sessions());

        let (client, server) = tokio::io::duplex(1024);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        let task = tokio::spawn(async move {
            bridge
                .run("c-3", server_rd, server_wr, CancellationToken::new())
                .await
        });

        expect_ack(&mut client_rd).await;
        sessions.deliver(b"pong".to_vec());
        let msg = tokio::time::timeout(
            Duration::from_secs(5),
            read_message(&mut client_rd, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .unwrap()
        .unwrap();
        match msg.kind {
            HubMessageKind::Stream(StreamFrame::Outbound(frame)) => {
                assert_eq!(frame.payload, b"pong")
            }
            other => panic!("Expected outbound frame, got {other:?}"),
        }

        client_wr.shutdown().await.unwrap();
        assert!(matches!(task.await.unwrap(), SessionEnd::EndOfInput));
    }

    #[tokio::test]
    async fn test_oversized_outbound_payload_is_dropped() {
        let peer = Arc::new(RecordingPeer::default());
        let bridge = bridge(peer);
        let sessions = Arc::clone(bridge.sessions());

        let (client, server) = tokio::io::duplex(64 * 1024);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        let task = tokio::spawn(async move {
            bridge
                .run("c-6", server_rd, server_wr, CancellationToken::new())
                .await
        });
        let session = SessionId(expect_ack(&mut client_rd).await);

        // Hex doubles the payload, so this cannot fit in one frame.
        let oversized = DEFAULT_MAX_FRAME_SIZE as usize / 2 + 1024;
        sessions.deliver(vec![0u8; oversized]);
        sessions.deliver(b"after".to_vec());

        let msg = tokio::time::timeout(
            Duration::from_secs(5),
            read_message(&mut client_rd, DEFAULT_MAX_FRAME_SIZE),
        )
        .await
        .unwrap()
        .unwrap();
        match msg.kind {
            HubMessageKind::Stream(StreamFrame::Outbound(frame)) => {
                assert_eq!(frame.payload, b"after")
            }
            other => panic!("Expected outbound frame, got {other:?}"),
        }

        let sink = sessions.get(session).unwrap();
        assert_eq!(sink.dropped(), 1);
        assert!(!sink.is_inert());

        client_wr.shutdown().await.unwrap();
        assert!(matches!(task.await.unwrap(), SessionEnd::EndOfInput));
    }

    #[tokio::test]
    async fn test_stalled_client_keeps_receive_loop_alive() {
        let peer = Arc::new(RecordingPeer::default());
        let bridge = bridge(peer.clone());
        let sessions = Arc::clone(bridge.sessions());

        let (client, server) = tokio::io::duplex(1024);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        let task = tokio::spawn(async move {
            bridge
                .run("c-4", server_rd, server_wr, CancellationToken::new())
                .await
        });
        let session = SessionId(expect_ack(&mut client_rd).await);

        // The client stops reading: the writer stalls and the queue fills.
        drop(client_rd);
        for _ in 0..50 {
            sessions.deliver(vec![0u8; 128]);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Inbound traffic still flows.
        write_message(
            &mut client_wr,
            &HubMessage::inbound(InboundFrame::new(vec![1], b"still here".to_vec())),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sessions.contains(session));
        assert_eq!(peer.forwarded.lock().unwrap().len(), 1);

        client_wr.shutdown().await.unwrap();
        assert!(matches!(task.await.unwrap(), SessionEnd::EndOfInput));
    }

    #[tokio::test]
    async fn test_unexpected_request_on_stream_fails_session() {
        let peer = Arc::new(RecordingPeer::default());
        let bridge = bridge(peer);

        let (client, server) = tokio::io::duplex(1024);
        let (server_rd, server_wr) = tokio::io::split(server);
        let (mut client_rd, mut client_wr) = tokio::io::split(client);

        let task = tokio::spawn(async move {
            bridge
                .run("c-5", server_rd, server_wr, CancellationToken::new())
                .await
        });
        expect_ack(&mut client_rd).await;

        write_message(
            &mut client_wr,
            &HubMessage::request(crate::message::HubRequest::GetIdentity),
        )
        .await
        .unwrap();
        match task.await.unwrap() {
            SessionEnd::Failed(WireError::Protocol(msg)) => assert!(msg.contains("open stream")),
            other => panic!("Expected protocol failure, got {other:?}"),
        }
    }
}
