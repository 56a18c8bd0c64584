//! LocalPeer: the peer subsystem a hub runs with.
//!
//! A node owns a secret key and one inbox on a [`MemoryMesh`]. Its own
//! identity and every identity registered through it route to that inbox. A
//! delivery task drains the inbox into the outbound sink the hub installed.

use crate::crypto::{recover_identity, NodeKey, RecoverError};
use crate::mesh::{MemoryMesh, MeshError};
use commhub_types::config::PeerSection;
use commhub_types::{Identity, RegistrationOutcome};
use commhub_wire::{OutboundSink, PeerSubsystem};
use dashmap::DashSet;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default capacity of a node's inbox.
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Address used only to pick the outward-facing interface. Nothing is sent.
const LOOKUP_PROBE: &str = "8.8.8.8:80";

type SinkSlot = Arc<RwLock<Option<Arc<dyn OutboundSink>>>>;

#[derive(Debug, Clone)]
pub struct PeerOptions {
    /// Determine the outward-facing IP to advertise; loopback otherwise.
    pub ip_lookup: bool,
    pub inbox_capacity: usize,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            ip_lookup: true,
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

impl From<&PeerSection> for PeerOptions {
    fn from(section: &PeerSection) -> Self {
        Self {
            ip_lookup: section.ip_lookup,
            ..Self::default()
        }
    }
}

/// One node on a [`MemoryMesh`].
pub struct LocalPeer {
    key: NodeKey,
    identity: Identity,
    mesh: Arc<MemoryMesh>,
    inbox: mpsc::Sender<Vec<u8>>,
    sink: SinkSlot,
    registered: DashSet<String>,
    advertised_addr: IpAddr,
    delivery_task: JoinHandle<()>,
}

impl LocalPeer {
    /// Join `mesh` under the key's identity and start the delivery task.
    ///
    /// Must be called inside a tokio runtime.
    pub fn join(mesh: Arc<MemoryMesh>, key: NodeKey, options: PeerOptions) -> Arc<Self> {
        let identity = key.identity();
        let (inbox, rx) = mpsc::channel(options.inbox_capacity.max(1));
        mesh.route(&identity.to_hex(), inbox.clone());

        let sink: SinkSlot = Arc::new(RwLock::new(None));
        let delivery_task = tokio::spawn(delivery_loop(rx, Arc::clone(&sink)));

        let advertised_addr = if options.ip_lookup {
            match lookup_outward_ip() {
                Ok(ip) => ip,
                Err(e) => {
                    warn!("peer: IP lookup failed ({}), advertising loopback", e);
                    IpAddr::V4(Ipv4Addr::LOCALHOST)
                }
            }
        } else {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        };

        info!(
            identity = %identity,
            addr = %advertised_addr,
            "peer: joined mesh"
        );

        Arc::new(Self {
            key,
            identity,
            mesh,
            inbox,
            sink,
            registered: DashSet::new(),
            advertised_addr,
            delivery_task,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn advertised_addr(&self) -> IpAddr {
        self.advertised_addr
    }

    /// Sign `data` with this node's key.
    pub fn sign(&self, data: &[u8]) -> commhub_types::HubResult<Vec<u8>> {
        self.key.sign(data)
    }

    /// Remote identities registered through this node.
    pub fn registered(&self) -> Vec<String> {
        self.registered.iter().map(|id| id.clone()).collect()
    }

    pub fn has_outbound(&self) -> bool {
        self.sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }
}

impl PeerSubsystem for LocalPeer {
    fn local_identity(&self) -> Identity {
        self.identity.clone()
    }

    fn register_remote_identity(&self, signature: &[u8]) -> RegistrationOutcome {
        match recover_identity(self.identity.as_bytes(), signature) {
            Ok(identity) => {
                let hex = identity.to_hex();
                self.mesh.route(&hex, self.inbox.clone());
                self.registered.insert(hex);
                RegistrationOutcome::Accepted { identity }
            }
            Err(RecoverError::Malformed(reason)) => RegistrationOutcome::Malformed { reason },
            Err(RecoverError::Unrecoverable(reason)) => {
                RegistrationOutcome::Unrecoverable { reason }
            }
        }
    }

    fn install_outbound(&self, sink: Arc<dyn OutboundSink>) {
        let mut slot = self.sink.write().unwrap_or_else(|e| e.into_inner());
        if slot.replace(sink).is_some() {
            debug!("peer: outbound sink replaced");
        }
    }

    fn forward_inbound(&self, target_identity_hex: &str, payload: Vec<u8>) {
        let len = payload.len();
        match self.mesh.send(target_identity_hex, payload) {
            Ok(()) => debug!(target_id = target_identity_hex, len, "peer: forwarded"),
            Err(e @ MeshError::NoRoute(_)) => {
                debug!("peer: dropping {} bytes: {}", len, e)
            }
            Err(e) => warn!("peer: dropping {} bytes: {}", len, e),
        }
    }
}

impl Drop for LocalPeer {
    fn drop(&mut self) {
        self.mesh.withdraw(&self.identity.to_hex(), &self.inbox);
        for id in self.registered.iter() {
            self.mesh.withdraw(id.key(), &self.inbox);
        }
        self.delivery_task.abort();
    }
}

async fn delivery_loop(mut rx: mpsc::Receiver<Vec<u8>>, sink: SinkSlot) {
    while let Some(payload) = rx.recv().await {
        let current = sink.read().unwrap_or_else(|e| e.into_inner()).clone();
        match current {
            Some(sink) => sink.deliver(payload),
            None => debug!(
                "peer: no outbound sink installed, dropping {} bytes",
                payload.len()
            ),
        }
    }
}

/// Local address of the interface that routes toward the public internet.
/// `connect` on UDP only consults the routing table.
fn lookup_outward_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(LOOKUP_PROBE)?;
    Ok(socket.local_addr()?.ip())
}
