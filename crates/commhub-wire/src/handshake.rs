//! Identity handshake: `get_identity` → client signs it → `register`.
//!
//! The handshake proves the registrant holds the private key behind the
//! recovered public key. It carries no nonce, so a captured signature stays
//! valid for the same hub identity.

use crate::peer::PeerSubsystem;
use commhub_types::{Identity, RegistrationOutcome};
use std::sync::Arc;
use tracing::{info, warn};

/// Unary half of the hub protocol.
#[derive(Clone)]
pub struct IdentityHandshake {
    peer: Arc<dyn PeerSubsystem>,
    identity: Identity,
}

impl IdentityHandshake {
    /// The local identity is read once here and never changes afterwards.
    pub fn new(peer: Arc<dyn PeerSubsystem>) -> Self {
        let identity = peer.local_identity();
        Self { peer, identity }
    }

    /// The hub's identity. Deterministic and side-effect free.
    pub fn get_identity(&self) -> &Identity {
        &self.identity
    }

    /// Bind a remote identity from a signature over [`get_identity`].
    ///
    /// [`get_identity`]: IdentityHandshake::get_identity
    pub fn register(&self, signature: &[u8]) -> RegistrationOutcome {
        let outcome = self.peer.register_remote_identity(signature);
        match &outcome {
            RegistrationOutcome::Accepted { identity } => {
                info!(identity = %identity, "hub: registered remote identity");
            }
            RegistrationOutcome::Malformed { reason }
            | RegistrationOutcome::Unrecoverable { reason } => {
                warn!(
                    outcome = outcome.kind(),
                    reason = %reason,
                    "hub: registration rejected"
                );
            }
        }
        outcome
    }
}
