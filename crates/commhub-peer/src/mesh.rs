//! In-process mesh: routes identity hex to the inbox of the node that
//! serves that identity.
//!
//! Several [`LocalPeer`](crate::LocalPeer)s joined to one mesh can reach each
//! other's registered clients without any network traffic.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshError {
    #[error("No route to {0}")]
    NoRoute(String),
    #[error("Inbox of {0} is full")]
    Full(String),
    #[error("Node serving {0} has left the mesh")]
    Closed(String),
}

/// Shared route table between local nodes.
#[derive(Default)]
pub struct MemoryMesh {
    routes: DashMap<String, mpsc::Sender<Vec<u8>>>,
}

impl MemoryMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Point `identity_hex` at `inbox`, replacing any earlier route.
    pub fn route(&self, identity_hex: &str, inbox: mpsc::Sender<Vec<u8>>) {
        let key = identity_hex.to_ascii_lowercase();
        debug!(target_id = %key, "peer: route added");
        self.routes.insert(key, inbox);
    }

    /// Remove a route, but only if it still points at `inbox`.
    pub fn withdraw(&self, identity_hex: &str, inbox: &mpsc::Sender<Vec<u8>>) {
        let key = identity_hex.to_ascii_lowercase();
        if self
            .routes
            .remove_if(&key, |_, tx| tx.same_channel(inbox))
            .is_some()
        {
            debug!(target_id = %key, "peer: route withdrawn");
        }
    }

    pub fn contains(&self, identity_hex: &str) -> bool {
        self.routes.contains_key(&identity_hex.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Enqueue `payload` for `identity_hex`. Never blocks.
    pub fn send(&self, identity_hex: &str, payload: Vec<u8>) -> Result<(), MeshError> {
        let key = identity_hex.to_ascii_lowercase();
        let inbox = self
            .routes
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MeshError::NoRoute(key.clone()))?;

        match inbox.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(MeshError::Full(key)),
            Err(TrySendError::Closed(_)) => {
                self.withdraw(&key, &inbox);
                Err(MeshError::Closed(key))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_follows_route() {
        let mesh = MemoryMesh::new();
        let (tx, mut rx) = mpsc::channel(4);
        mesh.route("02AB", tx);

        mesh.send("02ab", b"hi".to_vec()).unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"hi");
    }

    #[test]
    fn test_send_without_route() {
        let mesh = MemoryMesh::new();
        assert_eq!(
            mesh.send("02ff", vec![1]),
            Err(MeshError::NoRoute("02ff".to_string()))
        );
    }

    #[test]
    fn test_full_inbox_is_reported() {
        let mesh = MemoryMesh::new();
        let (tx, _rx) = mpsc::channel(1);
        mesh.route("01", tx);
        mesh.send("01", vec![1]).unwrap();
        assert_eq!(mesh.send("01", vec![2]), Err(MeshError::Full("01".into())));
        assert!(mesh.contains("01"));
    }

    #[test]
    fn test_closed_inbox_drops_route() {
        let mesh = MemoryMesh::new();
        let (tx, rx) = mpsc::channel(1);
        mesh.route("01", tx);
        drop(rx);
        assert_eq!(mesh.send("01", vec![1]), Err(MeshError::Closed("01".into())));
        assert!(!mesh.contains("01"));
    }

    #[test]
    fn test_withdraw_keeps_newer_route() {
        let mesh = MemoryMesh::new();
        let (old, _old_rx) = mpsc::channel(1);
        let (new, _new_rx) = mpsc::channel(1);
        mesh.route("01", old.clone());
        mesh.route("01", new);
        mesh.withdraw("01", &old);
        assert!(mesh.contains("01"));
        assert_eq!(mesh.len(), 1);
    }
}
