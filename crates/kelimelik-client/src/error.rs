//! Error types for the client layer.

use kelimelik_protocol::{EncodeError, ProtocolError};
use kelimelik_transport::TransportError;

/// Errors reported by [`ServerConnection`](crate::ServerConnection)
/// operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A packet could not be encoded or a frame could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Connecting, writing, or reading failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The connection shut down before the operation could complete.
    /// Pending expectations are rejected with this when the connection
    /// closes.
    #[error("connection closed")]
    ConnectionClosed,
}

impl From<EncodeError> for ClientError {
    fn from(err: EncodeError) -> Self {
        Self::Protocol(err.into())
    }
}
