//! Unified error type for the Kelimelik client.

use kelimelik_client::ClientError;
use kelimelik_protocol::ProtocolError;
use kelimelik_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// Applications built on the `kelimelik` meta-crate can use this single
/// type with `?` throughout; each variant converts from its sub-crate error.
#[derive(Debug, thiserror::Error)]
pub enum KelimelikError {
    /// A transport-level error (connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A connection-level error (closed, or a wrapped lower-level error).
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl KelimelikError {
    /// Whether the connection is gone, however it was reported.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            Self::Client(ClientError::ConnectionClosed)
                | Self::Transport(TransportError::ConnectionClosed(_))
                | Self::Transport(TransportError::Shutdown)
                | Self::Client(ClientError::Transport(TransportError::ConnectionClosed(_)))
                | Self::Client(ClientError::Transport(TransportError::Shutdown))
        )
    }
}
