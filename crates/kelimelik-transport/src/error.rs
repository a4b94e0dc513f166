/// Errors from opening, writing to, or reading from a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer went away (reset, broken pipe) mid-operation.
    #[error("connection closed by peer: {0}")]
    ConnectionClosed(String),

    /// Writing or flushing failed for another reason.
    #[error("write failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Reading failed for another reason.
    #[error("read failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// The write side was already shut down by [`close`](crate::Connection::close).
    #[error("write side already shut down")]
    Shutdown,
}
