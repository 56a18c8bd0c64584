//! Hub configuration types.
//!
//! Every section is `#[serde(default)]`, so a partial `config.toml` fills in
//! the remaining fields from [`HubConfig::default`].

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default RPC port of the hub.
pub const DEFAULT_PORT: u16 = 50001;

/// Default maximum body size of a single wire frame (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// How outbound payloads from the peer subsystem are routed to open sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Deliver only to the most recently opened session. Opening a new
    /// stream supersedes the previous one without notifying it.
    #[default]
    Latest,
    /// Deliver to every open session.
    Broadcast,
}

impl std::fmt::Display for DeliveryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Top-level hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Address the RPC listener binds to.
    pub listen_addr: SocketAddr,
    /// Human-readable node name (logging only).
    pub node_name: String,
    /// Seconds in-flight connections get to finish after a stop request.
    pub shutdown_grace_secs: u64,
    /// Capacity of each session's outbound queue.
    pub outbound_buffer: usize,
    /// Maximum body size of a single wire frame in bytes.
    pub max_frame_size: u32,
    /// Outbound routing policy.
    pub delivery_policy: DeliveryPolicy,
    /// Peer subsystem settings.
    pub peer: PeerSection,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            node_name: "_h1".to_string(),
            shutdown_grace_secs: 5,
            outbound_buffer: 256,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            delivery_policy: DeliveryPolicy::Latest,
            peer: PeerSection::default(),
        }
    }
}

impl HubConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.outbound_buffer == 0 {
            return Err("outbound_buffer must be at least 1".to_string());
        }
        if self.max_frame_size < 64 {
            return Err(format!(
                "max_frame_size {} is too small (minimum 64 bytes)",
                self.max_frame_size
            ));
        }
        Ok(())
    }
}

/// `[peer]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerSection {
    /// Look up the node's outward-facing IP to advertise. Disabled by
    /// `--no-lookup`.
    pub ip_lookup: bool,
    /// File holding the hex-encoded node secret key. When absent an
    /// ephemeral key is generated at startup.
    pub key_file: Option<PathBuf>,
}

impl Default for PeerSection {
    fn default() -> Self {
        Self {
            ip_lookup: true,
            key_file: None,
        }
    }
}
