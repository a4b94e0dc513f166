//! Wire protocol for the Kelimelik game server.
//!
//! This crate defines how messages look on the wire and nothing else:
//!
//! - **Values** ([`Value`], [`Tag`]): the tagged type system of 32-bit and
//!   8-bit integers, timestamps, text, and homogeneous (nestable) lists.
//! - **Packets** ([`Packet`]): a header string plus up to 255 root values,
//!   framed by a leading 4-byte size field.
//! - **Frame parser** ([`FrameParser`]): reassembles packets from a byte
//!   stream chunked any way the transport likes.
//! - **Errors** ([`ProtocolError`], [`EncodeError`], [`DecodeError`]).
//!
//! # Architecture
//!
//! ```text
//! Transport (bytes) → FrameParser → Packet → Client (dispatch, correlation)
//! ```
//!
//! Nothing here knows about sockets or pending requests. The protocol is
//! unencrypted and carries no request IDs; correlating replies is the
//! client crate's job.

mod error;
mod packet;
mod parser;
mod value;

pub use error::{DecodeError, EncodeError, ProtocolError};
pub use packet::{LENGTH_PREFIX_LEN, MAX_ROOT_VALUES, Packet};
pub use parser::{DEFAULT_MAX_FRAME_SIZE, FrameParser, Frames};
pub use value::{MAX_NESTING_DEPTH, Tag, Value};
