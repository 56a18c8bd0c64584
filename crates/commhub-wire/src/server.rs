//! HubServer: TCP listener, accept loop and graceful shutdown.
//!
//! A [`Hub`] is one local instance: a peer subsystem, the identity handshake
//! and the session table installed into that subsystem. A [`HubServer`]
//! binds a listener for a hub and runs each accepted connection in its own
//! task. A connection serves unary `get_identity` / `register` requests until
//! the client sends `communicate`, after which the [`StreamBridge`] owns it
//! for the rest of its life.

use crate::bridge::StreamBridge;
use crate::error::WireError;
use crate::handshake::IdentityHandshake;
use crate::message::*;
use crate::peer::PeerSubsystem;
use crate::session::SessionTable;
use commhub_types::config::HubConfig;
use commhub_types::{HubError, HubResult, Identity};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

/// One local hub instance.
pub struct Hub {
    config: HubConfig,
    handshake: IdentityHandshake,
    bridge: StreamBridge,
}

impl Hub {
    /// Build a hub on top of `peer` and install its session table as the
    /// peer's outbound sink.
    pub fn new(peer: Arc<dyn PeerSubsystem>, config: HubConfig) -> Arc<Self> {
        let sessions = Arc::new(SessionTable::new(
            config.delivery_policy,
            config.outbound_buffer,
        ));
        peer.install_outbound(sessions.clone());

        let handshake = IdentityHandshake::new(Arc::clone(&peer));
        let bridge = StreamBridge::new(peer, sessions, config.max_frame_size);

        Arc::new(Self {
            config,
            handshake,
            bridge,
        })
    }

    pub fn identity(&self) -> &Identity {
        self.handshake.get_identity()
    }

    pub fn handshake(&self) -> &IdentityHandshake {
        &self.handshake
    }

    pub fn bridge(&self) -> &StreamBridge {
        &self.bridge
    }

    pub fn sessions(&self) -> &Arc<SessionTable> {
        self.bridge.sessions()
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }
}

/// A running RPC listener for one hub.
pub struct HubServer {
    hub: Arc<Hub>,
    /// Actual bound address (useful when binding to port 0).
    local_addr: SocketAddr,
    /// Stops the accept loop.
    shutdown: CancellationToken,
    /// Parent of every connection's token; fired when the grace period ends.
    connections: CancellationToken,
    tracker: TaskTracker,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl HubServer {
    /// Bind the configured address and start accepting connections.
    ///
    /// A bind failure is returned as [`HubError::Bind`]; no server exists
    /// in that case.
    pub async fn start(hub: Arc<Hub>) -> HubResult<Self> {
        let addr = hub.config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HubError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            "hub: listening on {} (identity={}, policy={})",
            local_addr,
            hub.identity(),
            hub.config.delivery_policy
        );

        let shutdown = CancellationToken::new();
        let connections = CancellationToken::new();
        let tracker = TaskTracker::new();

        let accept_task = tokio::spawn(Self::accept_loop(
            listener,
            Arc::clone(&hub),
            tracker.clone(),
            shutdown.clone(),
            connections.clone(),
        ));

        Ok(Self {
            hub,
            local_addr,
            shutdown,
            connections,
            tracker,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Graceful shutdown: stop accepting, let in-flight connections finish
    /// for up to the configured grace period, then cancel the rest.
    ///
    /// Later calls wait for the first one's drain to complete.
    pub async fn stop(&self) {
        if self.shutdown.is_cancelled() {
            self.tracker.wait().await;
            return;
        }
        info!(
            connections = self.tracker.len(),
            "hub: stopping, no longer accepting connections"
        );
        self.shutdown.cancel();

        let accept_task = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                warn!(error = %e, "hub: accept loop ended abnormally");
            }
        }

        self.tracker.close();
        let grace = self.hub.config.shutdown_grace();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                grace_secs = grace.as_secs(),
                "hub: grace period elapsed, closing remaining connections"
            );
            self.connections.cancel();
            self.tracker.wait().await;
        }
        info!("hub: stopped");
    }

    /// Internal accept loop, run in a spawned task.
    async fn accept_loop(
        listener: TcpListener,
        hub: Arc<Hub>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
        connections: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                res = listener.accept() => res,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!("hub: accepted connection from {}", addr);
                    let _ = stream.set_nodelay(true);
                    let hub = Arc::clone(&hub);
                    let cancel = connections.child_token();
                    tracker.spawn(async move {
                        match handle_connection(stream, addr, &hub, cancel).await {
                            Ok(()) => debug!("hub: connection from {} closed", addr),
                            Err(e) if e.is_disconnect() => {
                                debug!("hub: connection from {} dropped: {}", addr, e)
                            }
                            Err(e) => debug!("hub: connection from {} ended: {}", addr, e),
                        }
                    });
                }
                Err(e) => {
                    error!("hub: accept error: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
        // The listener is dropped here; new connections are refused from now on.
    }
}

impl Drop for HubServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.connections.cancel();
    }
}

/// Serve one connection: unary requests, then optionally a stream.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: &Hub,
    cancel: CancellationToken,
) -> Result<(), WireError> {
    let (mut reader, mut writer) = stream.into_split();
    let max_frame_size = hub.config.max_frame_size;

    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let notice = HubMessage::error("", CODE_SHUTTING_DOWN, "Hub is shutting down");
                let _ = write_message(&mut writer, &notice).await;
                return Err(WireError::Cancelled);
            }
            msg = read_message(&mut reader, max_frame_size) => msg,
        };
        let msg = match msg {
            Ok(m) => m,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };

        match msg.kind {
            HubMessageKind::Request(HubRequest::GetIdentity) => {
                trace!("hub: get_identity from {}", addr);
                let reply = HubMessage::response(
                    msg.id,
                    HubResponse::Identity {
                        id: hub.identity().clone(),
                    },
                );
                write_message(&mut writer, &reply).await?;
            }
            HubMessageKind::Request(HubRequest::Register { signature }) => {
                trace!("hub: register from {}", addr);
                let outcome = hub.handshake.register(&signature);
                let reply = HubMessage::response(
                    msg.id,
                    HubResponse::Registered {
                        result: outcome.is_accepted(),
                        outcome,
                    },
                );
                write_message(&mut writer, &reply).await?;
            }
            HubMessageKind::Request(HubRequest::Communicate) => {
                info!("hub: {} opened a communicate stream", addr);
                let end = hub.bridge.run(&msg.id, reader, writer, cancel).await;
                return match end.into_error() {
                    None => Ok(()),
                    Some(e) => Err(e),
                };
            }
            HubMessageKind::Stream(_) => {
                warn!("hub: rejected stream frame from {} before communicate", addr);
                let reply = HubMessage::error(
                    msg.id,
                    CODE_BAD_REQUEST,
                    "Stream frame received before communicate",
                );
                write_message(&mut writer, &reply).await?;
                return Err(WireError::Protocol(
                    "stream frame before communicate".into(),
                ));
            }
            HubMessageKind::Response(_) => {
                let reply = HubMessage::error(
                    msg.id,
                    CODE_BAD_REQUEST,
                    "Clients must not send responses",
                );
                write_message(&mut writer, &reply).await?;
                return Err(WireError::Protocol("unexpected response from client".into()));
            }
        }
    }
}
