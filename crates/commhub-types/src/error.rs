//! Process-level error types for the CommHub system.
//!
//! Per-connection failures never surface here; they are contained in the
//! connection that produced them. `HubError` covers what can stop the
//! service from starting or serving.

use std::net::SocketAddr;
use thiserror::Error;

/// Top-level error type for the CommHub system.
#[derive(Error, Debug)]
pub enum HubError {
    /// The listening socket could not be created.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// The address that was requested.
        addr: SocketAddr,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The node key could not be loaded or parsed.
    #[error("Invalid node key: {0}")]
    InvalidKey(String),

    /// An I/O error occurred outside of any single connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for hub results.
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_error_mentions_address() {
        let err = HubError::Bind {
            addr: "127.0.0.1:50001".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:50001"));
        assert!(msg.contains("address in use"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
