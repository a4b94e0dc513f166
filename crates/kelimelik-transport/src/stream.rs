//! [`Connection`] over any Tokio byte stream.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::{Connection, ConnectionId, TransportError};

/// Default size of a single read from the stream.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Anything we can read bytes from and write bytes to.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

type BoxedStream = Box<dyn ByteStream>;

/// A connection over a byte stream, split into independently locked halves.
pub struct StreamConnection {
    id: ConnectionId,
    reader: Mutex<ReadHalf<BoxedStream>>,
    writer: Mutex<WriteHalf<BoxedStream>>,
    write_closed: AtomicBool,
    read_buffer_size: usize,
}

impl StreamConnection {
    /// Opens a TCP connection to `addr` (`"host:port"`).
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        Self::connect_with_read_buffer_size(addr, DEFAULT_READ_BUFFER_SIZE).await
    }

    /// Opens a TCP connection, reading at most `read_buffer_size` bytes per
    /// [`recv`](Connection::recv).
    pub async fn connect_with_read_buffer_size(
        addr: &str,
        read_buffer_size: usize,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await.map_err(|source| {
            TransportError::ConnectFailed {
                addr: addr.to_string(),
                source,
            }
        })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "could not disable Nagle's algorithm");
        }
        let conn = Self::with_read_buffer_size(stream, read_buffer_size);
        tracing::info!(id = %conn.id, addr, "TCP connection established");
        Ok(conn)
    }

    /// Wraps an already open stream.
    pub fn from_stream<S: ByteStream>(stream: S) -> Self {
        Self::with_read_buffer_size(stream, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Wraps an already open stream, reading at most `read_buffer_size`
    /// bytes per [`recv`](Connection::recv).
    pub fn with_read_buffer_size<S: ByteStream>(stream: S, read_buffer_size: usize) -> Self {
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        let id = ConnectionId::next();
        tracing::debug!(%id, "stream connection created");
        Self {
            id,
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            write_closed: AtomicBool::new(false),
            read_buffer_size: read_buffer_size.max(1),
        }
    }
}

impl Connection for StreamConnection {
    type Error = TransportError;

    async fn send(&self, data: &[u8]) -> Result<(), Self::Error> {
        if self.write_closed.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(data)
            .await
            .map_err(|e| classify(e, TransportError::SendFailed))?;
        writer
            .flush()
            .await
            .map_err(|e| classify(e, TransportError::SendFailed))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error> {
        let mut buf = vec![0u8; self.read_buffer_size];
        let n = self
            .reader
            .lock()
            .await
            .read(&mut buf)
            .await
            .map_err(|e| classify(e, TransportError::ReceiveFailed))?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), Self::Error> {
        if self.write_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.writer
            .lock()
            .await
            .shutdown()
            .await
            .map_err(|e| classify(e, TransportError::SendFailed))
    }

    fn id(&self) -> ConnectionId {
        self.id
    }
}

/// Errors meaning the peer is gone become `ConnectionClosed`; anything
/// else is wrapped by `other`.
fn classify(err: io::Error, other: fn(io::Error) -> TransportError) -> TransportError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => TransportError::ConnectionClosed(err.to_string()),
        _ => other(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, b) = tokio::io::duplex(64);
        let a = StreamConnection::from_stream(a);
        let b = StreamConnection::from_stream(b);
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_read_buffer_size_caps_chunks() {
        let (a, b) = tokio::io::duplex(64);
        let a = StreamConnection::from_stream(a);
        let b = StreamConnection::with_read_buffer_size(b, 3);

        a.send(b"abcdef").await.unwrap();
        let first = b.recv().await.unwrap().unwrap();
        assert_eq!(first, b"abc");
        let second = b.recv().await.unwrap().unwrap();
        assert_eq!(second, b"def");
    }

    #[tokio::test]
    async fn test_send_after_close_is_shutdown() {
        let (a, _b) = tokio::io::duplex(64);
        let a = StreamConnection::from_stream(a);
        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(matches!(
            a.send(b"late").await,
            Err(TransportError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_send_to_dropped_peer_is_connection_closed() {
        let (a, b) = tokio::io::duplex(64);
        let a = StreamConnection::from_stream(a);
        drop(b);
        assert!(matches!(
            a.send(b"anyone?").await,
            Err(TransportError::ConnectionClosed(_))
        ));
    }

    #[test]
    fn test_classify_keeps_other_errors() {
        let err = io::Error::new(io::ErrorKind::InvalidData, "garbage");
        assert!(matches!(
            classify(err, TransportError::ReceiveFailed),
            TransportError::ReceiveFailed(_)
        ));
    }
}
