//! Error types for localrpc.

use thiserror::Error;

/// Main error type for all localrpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller-supplied buffer cannot hold the encoded frame.
    #[error("Buffer too small: need {required} bytes, have {capacity}")]
    BufferTooSmall { required: usize, capacity: usize },

    /// Frame bytes do not form a valid frame.
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Length prefix announces a message above the configured maximum.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// Connection closed before the reply arrived.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A request is already outstanding on this connection.
    #[error("A request is already in flight on this connection")]
    RequestInFlight,

    /// Address cannot be used on this platform.
    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),
}

impl RpcError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        RpcError::Malformed(msg.into())
    }

    /// True for errors that end the connection they occurred on.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RpcError::Io(_)
                | RpcError::ConnectionClosed
                | RpcError::Malformed(_)
                | RpcError::MessageTooLarge { .. }
        )
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
