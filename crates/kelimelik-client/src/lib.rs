//! Client side of the Kelimelik game protocol.
//!
//! [`ServerConnection`] wraps a byte stream and gives it message semantics:
//!
//! - **Send** a [`Packet`](kelimelik_protocol::Packet) and observe outgoing
//!   traffic.
//! - **Expect** the next packet carrying one of a set of headers. The
//!   protocol has no request IDs, so every pending expectation that accepts
//!   a header is completed by the same packet.
//! - **Observe** all incoming traffic or one header.
//! - **Keepalive**: a reply-less `<prefix>requestPing` packet once per interval.
//!
//! # Architecture
//!
//! ```text
//! StreamConnection ──bytes──► FrameParser ──Packet──► Dispatcher
//!                                                      ├─ observers (All, then per header)
//!                                                      └─ PendingTable of expectations
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let conn = ServerConnection::connect(ConnectionConfig::default()).await?;
//! let login = Packet::new("GameModule_login").value("alice").value(1);
//! let reply = conn
//!     .request(&login, ["GameModule_loginOk", "GameModule_loginFailed"])
//!     .await?;
//! tracing::info!(%reply, "logged in");
//! ```

mod config;
mod connection;
mod dispatcher;
mod error;
mod expectation;
mod keepalive;
mod pending;

pub use config::ConnectionConfig;
pub use connection::ServerConnection;
pub use dispatcher::{Handler, ObserverId, Topic};
pub use error::ClientError;
pub use expectation::Expectation;
pub use pending::{PendingKey, PendingTable};
