//! A live connection to the game server.
//!
//! [`ServerConnection`] owns the byte stream and three background tasks: a
//! reader that turns bytes into packets and dispatches them, a writer that
//! puts whole frames on the wire one at a time, and an optional keepalive.
//! Clones share the same connection; dropping the last clone closes it.
//!
//! Only the writer task touches the write half. A `send` hands its frame
//! over and waits for the outcome, so cancelling a `send` never leaves half
//! a frame on the stream.
//!
//! Dispatch of an incoming packet runs in a fixed order:
//!
//! 1. packets whose header lacks the module prefix are ignored,
//! 2. `Topic::All` observers, then observers of that header, in
//!    registration order,
//! 3. every pending expectation that accepts the header is completed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use kelimelik_protocol::{FrameParser, Packet};
use kelimelik_transport::{ByteStream, Connection, ConnectionId, StreamConnection, TransportError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::dispatcher::{Dispatcher, Handler, ObserverId, Topic};
use crate::keepalive::Keepalive;
use crate::{ClientError, ConnectionConfig, Expectation};

/// Frames queued for the writer task before `send` starts waiting.
const OUTBOX_CAPACITY: usize = 64;

/// Handle to a server connection. Cheap to clone.
#[derive(Clone)]
pub struct ServerConnection {
    inner: Arc<Inner>,
    _guard: Arc<DropGuard>,
}

struct Inner {
    transport: StreamConnection,
    dispatcher: Arc<Mutex<Dispatcher>>,
    config: ConnectionConfig,
    closed: watch::Sender<bool>,
    shut_down: AtomicBool,
    outbox: mpsc::Sender<Outgoing>,
    writer: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

/// One encoded frame and where to report how writing it went.
struct Outgoing {
    frame: Bytes,
    done: oneshot::Sender<Result<(), TransportError>>,
}

/// Closes the connection when the last handle goes away. The background
/// tasks hold `Inner` too, so `Inner` alone can't tell.
struct DropGuard(Arc<Inner>);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.shutdown("connection handle dropped");
    }
}

impl ServerConnection {
    /// Connects to `config.address()` over TCP and starts the reader and
    /// keepalive tasks.
    pub async fn connect(config: ConnectionConfig) -> Result<Self, ClientError> {
        let config = config.validated();
        let transport = StreamConnection::connect_with_read_buffer_size(
            &config.address(),
            config.read_buffer_size,
        )
        .await?;
        Ok(Self::start(transport, config))
    }

    /// Runs the protocol over an already open stream (a TLS stream, an
    /// in-memory duplex in tests). `host` and `port` are ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_stream<S: ByteStream>(stream: S, config: ConnectionConfig) -> Self {
        let config = config.validated();
        let transport = StreamConnection::with_read_buffer_size(stream, config.read_buffer_size);
        Self::start(transport, config)
    }

    fn start(transport: StreamConnection, config: ConnectionConfig) -> Self {
        let (closed, closed_rx) = watch::channel(false);
        let parser = FrameParser::with_max_frame_size(config.max_frame_size);
        let keepalive = Keepalive::new(config.keepalive_interval, config.ping_header());
        let (outbox, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);

        let inner = Arc::new(Inner {
            transport,
            dispatcher: Arc::new(Mutex::new(Dispatcher::new())),
            config,
            closed,
            shut_down: AtomicBool::new(false),
            outbox,
            writer: Mutex::new(None),
            keepalive: Mutex::new(None),
        });

        // Task handles are stored before the reader can observe EOF and
        // shut down, so shutdown always finds them.
        let writer = tokio::spawn(write_loop(Arc::clone(&inner), outbox_rx));
        *inner.writer.lock() = Some(writer);
        if let Some(keepalive) = keepalive {
            let pinger = Arc::clone(&inner);
            let task = tokio::spawn(keepalive.run(move |ping| {
                let inner = Arc::clone(&pinger);
                async move { inner.send(&ping).await }
            }));
            *inner.keepalive.lock() = Some(task);
        }
        tokio::spawn(read_loop(Arc::clone(&inner), parser, closed_rx));

        debug!(id = %inner.transport.id(), prefix = %inner.config.module_prefix, "connection started");
        Self {
            _guard: Arc::new(DropGuard(Arc::clone(&inner))),
            inner,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.transport.id()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Encodes and writes one packet.
    ///
    /// `Topic::Outgoing` observers see the packet after it encodes and
    /// before it is written. Fails with [`ClientError::ConnectionClosed`]
    /// once the connection is closed.
    ///
    /// Cancel-safe with respect to the stream: dropping the future after the
    /// frame was queued only discards the outcome, the frame is still
    /// written whole.
    pub async fn send(&self, packet: &Packet) -> Result<(), ClientError> {
        self.inner.send(packet).await
    }

    /// Registers interest in the next packet carrying any of `headers`.
    ///
    /// Registration happens now, not when the returned future is first
    /// polled, so a reply arriving before the caller awaits is not lost.
    /// On a closed connection the expectation is already rejected.
    pub fn expect<I, H>(&self, headers: I) -> Expectation
    where
        I: IntoIterator<Item = H>,
        H: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let registered = self.inner.dispatcher.lock().register(headers);
        match registered {
            Some((key, reply)) => {
                Expectation::registered(reply, key, Arc::downgrade(&self.inner.dispatcher))
            }
            None => {
                debug!(id = %self.id(), "expect on a closed connection");
                Expectation::rejected()
            }
        }
    }

    /// Sends `packet` and waits for the first packet carrying one of
    /// `headers`. The expectation is registered before the write.
    pub async fn request<I, H>(&self, packet: &Packet, headers: I) -> Result<Packet, ClientError>
    where
        I: IntoIterator<Item = H>,
        H: Into<String>,
    {
        let reply = self.expect(headers);
        self.send(packet).await?;
        reply.await
    }

    /// Adds an observer. Handlers run on the reader task and must not block.
    pub fn observe<F>(&self, topic: Topic, handler: F) -> ObserverId
    where
        F: Fn(&Packet) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        self.inner.dispatcher.lock().observe(topic, handler)
    }

    /// Removes an observer. Returns `false` if it was already gone.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.inner.dispatcher.lock().unobserve(id)
    }

    /// Runs `handler` once when the connection closes, or right away if it
    /// already has.
    pub fn on_close<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let refused = self.inner.dispatcher.lock().on_close(Box::new(handler));
        if let Some(handler) = refused {
            handler();
        }
    }

    /// Resolves once the connection is closed, for whatever reason.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Closes the connection. Pending expectations are rejected and close
    /// handlers run. A write stalled on a peer that stopped reading is
    /// abandoned rather than waited for. Idempotent.
    pub async fn close(&self) {
        self.inner.shutdown("closed locally");
        // The aborted writer holds the write half until its task is dropped.
        let writer = self.inner.writer.lock().take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        if let Err(e) = self.inner.transport.close().await {
            debug!(id = %self.id(), error = %e, "transport shutdown failed");
        }
    }

    /// Number of registered, unresolved expectations.
    pub fn pending_count(&self) -> usize {
        self.inner.dispatcher.lock().pending_len()
    }

    /// Number of expectations a packet with `header` would complete.
    pub fn pending_for(&self, header: &str) -> usize {
        self.inner.dispatcher.lock().pending_for(header)
    }
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    async fn send(&self, packet: &Packet) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::ConnectionClosed);
        }
        let bytes = packet.encode()?;

        let handlers = self.dispatcher.lock().outgoing_handlers();
        for handler in &handlers {
            handler(packet);
        }

        trace!(id = %self.transport.id(), header = %packet.header, len = bytes.len(), "queueing packet");
        let (done, outcome) = oneshot::channel();
        self.outbox
            .send(Outgoing { frame: bytes, done })
            .await
            .map_err(|_| ClientError::ConnectionClosed)?;
        match outcome.await {
            Ok(result) => result.map_err(|e| {
                warn!(id = %self.transport.id(), header = %packet.header, error = %e, "send failed");
                ClientError::from(e)
            }),
            // The writer was stopped before reaching this frame.
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }

    fn dispatch(&self, packet: Packet) {
        if !self.config.is_application_header(&packet.header) {
            trace!(id = %self.transport.id(), header = %packet.header, "ignoring packet outside module prefix");
            return;
        }

        // Handlers run unlocked so they may call back into the connection.
        let handlers = self.dispatcher.lock().incoming_handlers(&packet.header);
        for handler in &handlers {
            handler(&packet);
        }

        let resolved = self.dispatcher.lock().resolve(&packet);
        trace!(
            id = %self.transport.id(),
            header = %packet.header,
            observers = handlers.len(),
            resolved,
            "packet dispatched"
        );
    }

    /// Feeds one chunk to the parser and dispatches every packet in it.
    /// Returns the reason to stop reading, if any.
    fn consume(&self, parser: &mut FrameParser, chunk: &[u8]) -> Result<(), &'static str> {
        let mut frames = parser.advance(chunk);
        while let Some(frame) = frames.next() {
            match frame {
                Ok(packet) => self.dispatch(packet),
                Err(e) => {
                    let streak = frames.consecutive_errors();
                    warn!(id = %self.transport.id(), error = %e, streak, "dropping corrupt frame");
                    if streak > self.config.max_corrupt_frames {
                        return Err("too many corrupt frames");
                    }
                }
            }
            // A handler may have closed the connection.
            if self.is_closed() {
                return Err("closed locally");
            }
        }
        Ok(())
    }

    /// Closes the dispatcher, stops the keepalive and writer tasks and wakes
    /// `closed()` waiters. Only the first call does anything.
    fn shutdown(&self, reason: &str) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(task) = self.keepalive.lock().take() {
            task.abort();
        }
        // Left in place so `close` can wait for the abort to land.
        if let Some(task) = self.writer.lock().as_ref() {
            task.abort();
        }

        let (abandoned, handlers) = self.dispatcher.lock().close();
        if abandoned > 0 {
            warn!(id = %self.transport.id(), abandoned, "rejecting pending expectations");
        }
        self.closed.send_replace(true);
        info!(id = %self.transport.id(), reason, "connection closed");

        for handler in handlers {
            handler();
        }
    }
}

/// Writes queued frames in order, each one whole, and reports each outcome.
async fn write_loop(inner: Arc<Inner>, mut outbox: mpsc::Receiver<Outgoing>) {
    while let Some(Outgoing { frame, done }) = outbox.recv().await {
        let result = inner.transport.send(&frame).await;
        if done.send(result).is_err() {
            trace!(id = %inner.transport.id(), "send outcome dropped, caller stopped waiting");
        }
    }
}

async fn read_loop(inner: Arc<Inner>, mut parser: FrameParser, mut closed: watch::Receiver<bool>) {
    let reason = loop {
        let chunk = tokio::select! {
            // The flag only ever flips to true, and a dropped sender means
            // the connection is gone, so any wakeup ends the loop.
            _ = closed.changed() => break "closed locally",
            result = inner.transport.recv() => result,
        };
        match chunk {
            Ok(Some(bytes)) => {
                if let Err(reason) = inner.consume(&mut parser, &bytes) {
                    break reason;
                }
            }
            Ok(None) => break "closed by peer",
            Err(e) => {
                debug!(id = %inner.transport.id(), error = %e, "read failed");
                break "read failed";
            }
        }
    };
    inner.shutdown(reason);
}
