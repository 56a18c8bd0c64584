//! Peer subsystem for the CommHub stream bridge.
//!
//! - **crypto**: secp256k1 node keys, signing of the hub identity and
//!   recovery of a signer's identity from a registration signature
//! - **mesh**: in-process route table between local nodes
//! - **node**: [`LocalPeer`], the [`commhub_wire::PeerSubsystem`]
//!   implementation the binary runs with

pub mod crypto;
pub mod mesh;
pub mod node;

pub use crypto::{recover_identity, NodeKey, RecoverError};
pub use mesh::{MemoryMesh, MeshError};
pub use node::{LocalPeer, PeerOptions};
