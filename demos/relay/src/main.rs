//! Decode/re-encode relay.
//!
//! Sits between a game client and the server. Every frame in either
//! direction is decoded, logged, and encoded again before it is forwarded,
//! which makes this a live check of the codec against real traffic. Int8
//! values come out the other side as Int32; undecodable frames are logged
//! and dropped.
//!
//! ```text
//! relay [LISTEN_ADDR] [UPSTREAM_ADDR]
//! ```

use std::fmt;
use std::io;

use kelimelik::protocol::FrameParser;
use kelimelik::transport::DEFAULT_READ_BUFFER_SIZE;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

const DEFAULT_LISTEN: &str = "127.0.0.1:4443";
const DEFAULT_UPSTREAM: &str = "kelimelikserver.he2apps.com:443";

#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Client to server.
    Local,
    /// Server to client.
    Remote,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote => f.write_str("remote"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    kelimelik::init_tracing();

    let mut args = std::env::args().skip(1);
    let listen = args.next().unwrap_or_else(|| DEFAULT_LISTEN.to_string());
    let upstream = args.next().unwrap_or_else(|| DEFAULT_UPSTREAM.to_string());

    let listener = TcpListener::bind(&listen).await?;
    info!(%listen, %upstream, "relay listening");

    loop {
        let (client, peer) = listener.accept().await?;
        info!(%peer, "client connected");
        let upstream = upstream.clone();
        tokio::spawn(async move {
            match relay(client, &upstream).await {
                Ok(()) => info!(%peer, "relay session ended"),
                Err(e) => warn!(%peer, error = %e, "relay session failed"),
            }
        });
    }
}

/// Connects upstream and pumps both directions until either side closes.
/// Dropping the other pump closes its sockets too.
async fn relay(client: TcpStream, upstream: &str) -> io::Result<()> {
    let server = TcpStream::connect(upstream).await?;
    if let Err(e) = server.set_nodelay(true) {
        debug!(error = %e, "could not disable Nagle's algorithm");
    }
    debug!(%upstream, "upstream connected");

    let (client_rx, client_tx) = client.into_split();
    let (server_rx, server_tx) = server.into_split();
    tokio::select! {
        result = pump(Direction::Local, client_rx, server_tx) => result,
        result = pump(Direction::Remote, server_rx, client_tx) => result,
    }
}

async fn pump(direction: Direction, mut from: OwnedReadHalf, mut to: OwnedWriteHalf) -> io::Result<()> {
    let mut parser = FrameParser::new();
    let mut buf = vec![0u8; DEFAULT_READ_BUFFER_SIZE];
    let mut out = Vec::new();

    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            debug!(%direction, "stream closed");
            return Ok(());
        }

        for frame in parser.advance(&buf[..n]) {
            let packet = match frame {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(%direction, error = %e, "dropping undecodable frame");
                    continue;
                }
            };
            info!(%direction, %packet);
            match packet.encode() {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => warn!(%direction, header = %packet.header, error = %e, "could not re-encode packet"),
            }
        }

        if !out.is_empty() {
            to.write_all(&out).await?;
            out.clear();
        }
    }
}
