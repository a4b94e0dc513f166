//! Transport abstraction layer for Kelimelik.
//!
//! Provides the [`Connection`] trait that the client drives, and
//! [`StreamConnection`], which implements it over any Tokio byte stream:
//! a TCP socket from [`StreamConnection::connect`], or an in-memory
//! [`tokio::io::duplex`] pipe in tests.

#![allow(async_fn_in_trait)]

mod error;
mod stream;

pub use error::TransportError;
pub use stream::{ByteStream, DEFAULT_READ_BUFFER_SIZE, StreamConnection};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, shown as `conn-N` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocates the next id. Ids start at 1 and only increase.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A single connection that can send and receive bytes.
///
/// The read and write sides are independent: a task blocked in
/// [`recv`](Self::recv) never holds up a [`send`](Self::send).
pub trait Connection: Send + Sync + 'static {
    /// The error type for connection operations.
    type Error: std::error::Error + Send + Sync;

    /// Writes all of `data` and flushes it.
    async fn send(&self, data: &[u8]) -> Result<(), Self::Error>;

    /// Receives the next chunk of bytes, however the stream happened to
    /// split them. Chunks carry no framing.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Shuts down the write side. Pending reads see end of stream once the
    /// peer closes its side.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}
