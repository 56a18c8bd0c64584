//! Boundary to the peer-to-peer messaging subsystem.
//!
//! The hub never talks to the peer network directly. It consumes the four
//! operations of [`PeerSubsystem`] and hands the subsystem an
//! [`OutboundSink`] through which payloads for connected clients flow back.

use commhub_types::{Identity, RegistrationOutcome};
use std::sync::Arc;

/// Destination for payloads the peer subsystem wants delivered to clients.
///
/// Implementations must never block and never panic: the caller is the peer
/// subsystem's own delivery path, which a dead client must not stall.
pub trait OutboundSink: Send + Sync + 'static {
    fn deliver(&self, payload: Vec<u8>);
}

/// Operations the hub needs from the peer network.
pub trait PeerSubsystem: Send + Sync + 'static {
    /// Identity of the local node. Constant for the life of the instance.
    fn local_identity(&self) -> Identity;

    /// Recover the signer of `signature` (made over [`local_identity`]) and
    /// register it as reachable through this node.
    ///
    /// [`local_identity`]: PeerSubsystem::local_identity
    fn register_remote_identity(&self, signature: &[u8]) -> RegistrationOutcome;

    /// Install the sink for outbound payloads. Called once per hub instance.
    fn install_outbound(&self, sink: Arc<dyn OutboundSink>);

    /// Hand a payload to the peer network. Fire-and-forget: must return
    /// promptly without waiting for delivery.
    fn forward_inbound(&self, target_identity_hex: &str, payload: Vec<u8>);
}
