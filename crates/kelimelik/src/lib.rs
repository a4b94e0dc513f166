//! # Kelimelik
//!
//! Async client for the Kelimelik word game server.
//!
//! The game speaks a small binary protocol over a plain TCP stream: every
//! message is a [`Packet`] with a header string and a list of typed
//! [`Value`]s. This crate ties the layers together and re-exports what an
//! application needs:
//!
//! - [`kelimelik_protocol`]: values, packets, frame parsing,
//! - [`kelimelik_transport`]: the byte stream underneath,
//! - [`kelimelik_client`]: [`ServerConnection`] with expectations,
//!   observers and keepalive.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kelimelik::prelude::*;
//!
//! # async fn run() -> Result<(), KelimelikError> {
//! kelimelik::init_tracing();
//!
//! let conn = ServerConnection::connect(ConnectionConfig::default()).await?;
//! let login = Packet::new("GameModule_login").value("alice").value("secret");
//! let reply = conn
//!     .request(&login, ["GameModule_loginOk", "GameModule_loginFailed"])
//!     .await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

mod error;

pub use error::KelimelikError;

pub use kelimelik_client as client;
pub use kelimelik_protocol as protocol;
pub use kelimelik_transport as transport;

/// Everything needed to talk to the server.
pub mod prelude {
    pub use crate::KelimelikError;
    pub use kelimelik_client::{
        ClientError, ConnectionConfig, Expectation, ObserverId, ServerConnection, Topic,
    };
    pub use kelimelik_protocol::{DecodeError, EncodeError, Packet, ProtocolError, Value};
    pub use kelimelik_transport::{ConnectionId, TransportError};
}

/// Installs a `tracing` subscriber that prints to stderr, filtered by
/// `RUST_LOG` (default `info`).
///
/// For binaries and demos; libraries should leave subscriber setup to the
/// application. Calling it twice is harmless.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
