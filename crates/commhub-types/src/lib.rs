//! Core types for the CommHub stream bridge.
//!
//! This crate defines the data shared between the wire protocol, the peer
//! subsystem and the binary: identities, stream frames, registration
//! outcomes, configuration and errors. It contains no I/O.

pub mod config;
pub mod error;
pub mod frame;
pub mod identity;
pub mod serde_compat;

pub use error::{HubError, HubResult};
pub use frame::{InboundFrame, OutboundFrame};
pub use identity::{Identity, RegistrationOutcome};
