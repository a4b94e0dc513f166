//! Error types for the protocol layer.
//!
//! Encoding and decoding fail for different reasons and are reported to
//! different parties: an [`EncodeError`] goes back to whoever tried to send
//! a packet, a [`DecodeError`] goes to whoever is consuming the frame
//! parser. [`ProtocolError`] wraps both so the layers above deal with a
//! single type.

use crate::Tag;

/// Errors that can occur in the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A packet could not be turned into bytes.
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    /// Bytes could not be turned into a packet.
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Reasons a [`Packet`](crate::Packet) cannot be encoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The root element count is an 8-bit field.
    #[error("a packet cannot contain more than 255 root values (got {0})")]
    TooManyRootValues(usize),

    /// Every element of a list must encode to the same tag.
    #[error("list elements must share one type: expected {expected:?}, found {found:?} at index {index}")]
    HeterogeneousList {
        expected: Tag,
        found: Tag,
        index: usize,
    },

    /// A value was written under a declared tag it does not encode to.
    #[error("type mismatch: declared {declared:?}, value encodes as {actual:?}")]
    TagMismatch { declared: Tag, actual: Tag },

    /// Text is prefixed by an unsigned 16-bit byte count.
    #[error("text of {0} bytes exceeds the 65535 byte limit")]
    TextTooLong(usize),

    /// List element counts are unsigned 32-bit.
    #[error("list of {0} elements exceeds the u32 element limit")]
    ListTooLong(usize),

    /// The leading size field is unsigned 32-bit.
    #[error("encoded packet of {0} bytes does not fit the size field")]
    PacketTooLarge(usize),
}

/// Reasons a byte buffer cannot be decoded into a [`Packet`](crate::Packet).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The leading size field disagrees with the buffer length.
    /// This is the frame corruption / truncation guard.
    #[error("size field says {declared} bytes but {actual} follow it")]
    SizeMismatch { declared: u32, actual: usize },

    /// The body ended in the middle of a value.
    #[error("unexpected end of frame: needed {needed} bytes at offset {offset}, {available} available")]
    Truncated {
        needed: usize,
        offset: usize,
        available: usize,
    },

    /// A tag byte that the protocol does not define.
    #[error("unknown value tag {0}")]
    UnknownTag(u8),

    /// A text value that is not valid UTF-8.
    #[error("text at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),

    /// Lists nested beyond [`MAX_NESTING_DEPTH`](crate::MAX_NESTING_DEPTH).
    #[error("lists nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// A timestamp that cannot be represented as a calendar time.
    #[error("timestamp {0} is out of range")]
    TimestampOutOfRange(i64),

    /// The frame parser refused a declared frame length.
    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: u32, max: u32 },
}
