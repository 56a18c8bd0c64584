//! End-to-end test: two hubs on one in-process mesh.
//!
//! Each hub runs a real [`HubServer`] on loopback with a [`LocalPeer`]
//! behind it. A client registered with hub A sends to the identity a client
//! registered with hub B, and B's client must receive the payload.

use commhub_peer::{LocalPeer, MemoryMesh, NodeKey, PeerOptions};
use commhub_types::config::HubConfig;
use commhub_wire::{ClientStream, Hub, HubClient, HubServer};
use std::sync::Arc;
use std::time::Duration;

fn loopback_config(node_name: &str) -> HubConfig {
    HubConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        node_name: node_name.to_string(),
        shutdown_grace_secs: 0,
        ..HubConfig::default()
    }
}

async fn start_hub(mesh: &Arc<MemoryMesh>, node_name: &str) -> (Arc<LocalPeer>, HubServer) {
    let options = PeerOptions {
        ip_lookup: false,
        ..PeerOptions::default()
    };
    let peer = LocalPeer::join(Arc::clone(mesh), NodeKey::generate(), options);
    let hub = Hub::new(peer.clone(), loopback_config(node_name));
    let server = HubServer::start(hub).await.unwrap();
    (peer, server)
}

/// GetIdentity → sign → Register → Communicate, as a real client does.
async fn register_and_open(server: &HubServer, key: &NodeKey) -> ClientStream {
    let mut client = HubClient::connect(server.local_addr()).await.unwrap();
    let hub_id = client.get_identity().await.unwrap();
    let signature = key.sign(hub_id.as_bytes()).unwrap();

    let reply = client.register(&signature).await.unwrap();
    assert!(reply.result, "registration rejected: {:?}", reply.outcome);
    assert_eq!(reply.outcome.identity(), Some(&key.identity()));

    client.communicate().await.unwrap()
}

#[tokio::test]
async fn test_two_hubs_deliver_across_mesh() {
    let mesh = MemoryMesh::new();
    let (_peer_a, hub_a) = start_hub(&mesh, "_h1").await;
    let (peer_b, hub_b) = start_hub(&mesh, "_h2").await;
    assert_ne!(hub_a.hub().identity(), hub_b.hub().identity());

    let key_a = NodeKey::generate();
    let key_b = NodeKey::generate();
    let mut stream_a = register_and_open(&hub_a, &key_a).await;
    let mut stream_b = register_and_open(&hub_b, &key_b).await;
    assert!(peer_b.registered().contains(&key_b.identity().to_hex()));

    stream_a
        .send(key_b.identity().as_bytes(), b"ping")
        .await
        .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(2), stream_b.recv())
        .await
        .expect("payload did not cross the mesh")
        .unwrap();
    assert_eq!(got.as_deref(), Some(&b"ping"[..]));

    // And back.
    stream_b
        .send(key_a.identity().as_bytes(), b"pong")
        .await
        .unwrap();
    let got = tokio::time::timeout(Duration::from_secs(2), stream_a.recv())
        .await
        .expect("reply did not cross the mesh")
        .unwrap();
    assert_eq!(got.as_deref(), Some(&b"pong"[..]));

    hub_a.stop().await;
    hub_b.stop().await;
}

#[tokio::test]
async fn test_signature_over_wrong_hub_is_not_routed_there() {
    let mesh = MemoryMesh::new();
    let (_peer_a, hub_a) = start_hub(&mesh, "_h1").await;
    let (_peer_b, hub_b) = start_hub(&mesh, "_h2").await;

    // Signed for hub B, presented to hub A.
    let key = NodeKey::generate();
    let signature = key.sign(hub_b.hub().identity().as_bytes()).unwrap();
    let mut client = HubClient::connect(hub_a.local_addr()).await.unwrap();
    let reply = client.register(&signature).await.unwrap();
    assert_ne!(reply.outcome.identity(), Some(&key.identity()));
    assert!(!mesh.contains(&key.identity().to_hex()));

    let malformed = client.register(&signature[..64]).await.unwrap();
    assert!(!malformed.result);
    assert_eq!(malformed.outcome.kind(), "malformed");

    hub_a.stop().await;
    hub_b.stop().await;
}
