//! Errors from the wire protocol layer.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: u32 },
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("Operation cancelled")]
    Cancelled,
}

impl WireError {
    /// True when the peer simply went away (EOF or reset), as opposed to a
    /// malformed exchange.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
