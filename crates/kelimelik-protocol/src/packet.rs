//! Packets: a header string plus an ordered list of root values.
//!
//! ```text
//! ┌───────────┬──────────────┬─────────────┬───────┬──────────────────────┐
//! │ size (u32)│ hdr len (u16)│ header UTF-8│ n (u8)│ n × (tag + body)     │
//! └───────────┴──────────────┴─────────────┴───────┴──────────────────────┘
//!   size = byte length of everything after the size field
//! ```

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::value::{Reader, decode_tagged, encode_tagged, encode_text};
use crate::{DecodeError, EncodeError, Value};

/// Byte length of the leading size field.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Maximum number of root values in one packet.
pub const MAX_ROOT_VALUES: usize = u8::MAX as usize;

/// A decoded (or about to be encoded) protocol message.
///
/// The header names the message, by convention `"<Module>_<action>"` such
/// as `"GameModule_requestLogin"`. What each value means is decided by the
/// header and the value's position; this type never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message name, e.g. `"GameModule_requestPing"`.
    pub header: String,
    /// Root values in wire order.
    pub values: Vec<Value>,
}

impl Packet {
    /// Creates a packet with no values.
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            values: Vec::new(),
        }
    }

    /// Creates a packet with the given values.
    pub fn with_values(header: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            header: header.into(),
            values,
        }
    }

    /// Appends a value, builder style.
    ///
    /// ```rust
    /// use kelimelik_protocol::Packet;
    ///
    /// let login = Packet::new("GameModule_requestLogin")
    ///     .value(1234)
    ///     .value("secret")
    ///     .value(341);
    /// assert_eq!(login.values.len(), 3);
    /// ```
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    /// The root value at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Encodes the packet into one complete frame, size field included.
    ///
    /// # Errors
    /// Fails when there are more than 255 root values, a list mixes element
    /// types, or a text or list exceeds its length field.
    pub fn encode(&self) -> Result<Bytes, EncodeError> {
        if self.values.len() > MAX_ROOT_VALUES {
            return Err(EncodeError::TooManyRootValues(self.values.len()));
        }

        let mut out = BytesMut::with_capacity(512);
        out.extend_from_slice(&[0; LENGTH_PREFIX_LEN]);
        encode_text(&self.header, &mut out)?;
        out.extend_from_slice(&[self.values.len() as u8]);
        for value in &self.values {
            encode_tagged(value, &mut out)?;
        }

        let body_len = out.len() - LENGTH_PREFIX_LEN;
        let size = u32::try_from(body_len).map_err(|_| EncodeError::PacketTooLarge(body_len))?;
        out[..LENGTH_PREFIX_LEN].copy_from_slice(&size.to_be_bytes());
        Ok(out.freeze())
    }

    /// Decodes one complete frame, size field included.
    ///
    /// The buffer must hold exactly one frame: the size field is checked
    /// against the buffer length. The root count is trusted, so bytes left
    /// over after the last root value are ignored.
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(frame);
        let declared = r.u32()?;
        let actual = r.remaining();
        if declared as usize != actual {
            return Err(DecodeError::SizeMismatch { declared, actual });
        }

        let header = r.text()?;
        let count = r.u8()?;
        let values = (0..count)
            .map(|_| decode_tagged(&mut r))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { header, values })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.header)?;
        for value in &self.values {
            write!(f, " {value}")?;
        }
        Ok(())
    }
}
