//! Tagged values: the protocol's small type system.
//!
//! Every value on the wire is one tag byte followed by a body whose layout
//! depends on the tag. Inside a list the element tag is written once, after
//! the element count, and the elements follow without their own tag bytes.
//!
//! ```text
//! Int32      0x00  i32 BE
//! Int8       0x01  i8                (decode only, re-encodes as Int32)
//! Timestamp  0x03  i64 BE seconds since the Unix epoch
//! Text       0x07  u16 BE byte length + UTF-8 bytes
//! List       0x08  u32 BE count + element tag + count untagged bodies
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Utc};

use crate::{DecodeError, EncodeError};

/// Lists nested deeper than this are rejected while decoding, so a hostile
/// frame full of list headers cannot exhaust the stack.
pub const MAX_NESTING_DEPTH: usize = 64;

/// The wire type tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tag {
    Int32 = 0,
    Int8 = 1,
    Timestamp = 3,
    Text = 7,
    List = 8,
}

impl Tag {
    /// Parses a tag byte. Returns `None` for bytes the protocol does not define.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Int32),
            1 => Some(Self::Int8),
            3 => Some(Self::Timestamp),
            7 => Some(Self::Text),
            8 => Some(Self::List),
            _ => None,
        }
    }

    /// The byte written on the wire for this tag.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A single protocol value.
///
/// Values are plain data: build them with the `From` conversions and read
/// them back with the `as_*` accessors.
///
/// ```rust
/// use kelimelik_protocol::Value;
///
/// let word = Value::from("kelime");
/// let scores = Value::from(vec![10, 20, 30]);
///
/// assert_eq!(word.as_str(), Some("kelime"));
/// assert_eq!(scores.as_list().map(<[Value]>::len), Some(3));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Signed 32-bit integer. All numbers and booleans encode to this.
    Int32(i32),
    /// Signed 8-bit integer. Only ever produced by decoding; the encoder
    /// writes it back out as an [`Int32`](Value::Int32).
    Int8(i8),
    /// Whole seconds since the Unix epoch. Sub-second precision is dropped
    /// when encoding.
    Timestamp(DateTime<Utc>),
    /// UTF-8 text of at most 65535 bytes.
    Text(String),
    /// A homogeneous list. Elements may themselves be lists.
    List(Vec<Value>),
}

impl Value {
    /// Builds a timestamp from raw seconds since the epoch.
    ///
    /// Returns `None` when the seconds do not fit a calendar time.
    pub fn timestamp_secs(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self::Timestamp)
    }

    /// The tag matching this value's variant.
    pub fn tag(&self) -> Tag {
        match self {
            Self::Int32(_) => Tag::Int32,
            Self::Int8(_) => Tag::Int8,
            Self::Timestamp(_) => Tag::Timestamp,
            Self::Text(_) => Tag::Text,
            Self::List(_) => Tag::List,
        }
    }

    /// The tag this value is written under. Differs from [`tag`](Self::tag)
    /// only for `Int8`, which the encoder never emits.
    pub fn wire_tag(&self) -> Tag {
        match self {
            Self::Int8(_) => Tag::Int32,
            other => other.tag(),
        }
    }

    /// Integer content of either integer width.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(v) => Some(*v),
            Self::Int8(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    /// Integer content interpreted as a flag (non-zero is `true`).
    pub fn as_bool(&self) -> Option<bool> {
        self.as_i32().map(|v| v != 0)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Self::Int8(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Int32(i32::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32(v) => write!(f, "{v}"),
            Self::Int8(v) => write!(f, "{v}i8"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Writes a root value: tag byte, then body.
pub(crate) fn encode_tagged(value: &Value, out: &mut BytesMut) -> Result<(), EncodeError> {
    let tag = value.wire_tag();
    out.put_u8(tag.as_u8());
    encode_body(value, tag, out)
}

/// Writes a value body under a declared tag (no tag byte).
fn encode_body(value: &Value, declared: Tag, out: &mut BytesMut) -> Result<(), EncodeError> {
    let actual = value.wire_tag();
    if actual != declared {
        return Err(EncodeError::TagMismatch { declared, actual });
    }
    match value {
        Value::Int32(v) => out.put_i32(*v),
        Value::Int8(v) => out.put_i32(i32::from(*v)),
        Value::Timestamp(t) => out.put_i64(t.timestamp()),
        Value::Text(s) => encode_text(s, out)?,
        Value::List(items) => {
            let element = element_tag(items)?;
            let count = u32::try_from(items.len())
                .map_err(|_| EncodeError::ListTooLong(items.len()))?;
            out.put_u32(count);
            out.put_u8(element.as_u8());
            for item in items {
                encode_body(item, element, out)?;
            }
        }
    }
    Ok(())
}

/// Writes a u16-length-prefixed UTF-8 string.
pub(crate) fn encode_text(text: &str, out: &mut BytesMut) -> Result<(), EncodeError> {
    let len = u16::try_from(text.len()).map_err(|_| EncodeError::TextTooLong(text.len()))?;
    out.put_u16(len);
    out.put_slice(text.as_bytes());
    Ok(())
}

/// The single tag shared by every element. Empty lists declare Int32.
fn element_tag(items: &[Value]) -> Result<Tag, EncodeError> {
    let Some(first) = items.first() else {
        return Ok(Tag::Int32);
    };
    let expected = first.wire_tag();
    match items
        .iter()
        .map(Value::wire_tag)
        .enumerate()
        .find(|(_, tag)| *tag != expected)
    {
        Some((index, found)) => Err(EncodeError::HeterogeneousList {
            expected,
            found,
            index,
        }),
        None => Ok(expected),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Bounds-checked cursor over a frame.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::Truncated {
                needed: n,
                offset: self.pos,
                available: self.remaining(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, DecodeError> {
        self.array().map(u16::from_be_bytes)
    }

    pub(crate) fn u32(&mut self) -> Result<u32, DecodeError> {
        self.array().map(u32::from_be_bytes)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.array().map(i32::from_be_bytes)
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        self.array().map(i64::from_be_bytes)
    }

    pub(crate) fn text(&mut self) -> Result<String, DecodeError> {
        let len = usize::from(self.u16()?);
        let start = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8(start))
    }
}

fn read_tag(r: &mut Reader<'_>) -> Result<Tag, DecodeError> {
    let byte = r.u8()?;
    Tag::from_u8(byte).ok_or(DecodeError::UnknownTag(byte))
}

/// Reads a root value: tag byte, then body.
pub(crate) fn decode_tagged(r: &mut Reader<'_>) -> Result<Value, DecodeError> {
    let tag = read_tag(r)?;
    decode_body(r, tag, 0)
}

fn decode_body(r: &mut Reader<'_>, tag: Tag, depth: usize) -> Result<Value, DecodeError> {
    let value = match tag {
        Tag::Int32 => Value::Int32(r.i32()?),
        Tag::Int8 => Value::Int8(i8::from_be_bytes([r.u8()?])),
        Tag::Timestamp => {
            let secs = r.i64()?;
            Value::timestamp_secs(secs).ok_or(DecodeError::TimestampOutOfRange(secs))?
        }
        Tag::Text => Value::Text(r.text()?),
        Tag::List => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(DecodeError::NestingTooDeep(MAX_NESTING_DEPTH));
            }
            let count = r.u32()? as usize;
            let element = read_tag(r)?;
            // Every element body is at least one byte, so the remaining
            // length bounds the allocation.
            let mut items = Vec::with_capacity(count.min(r.remaining()));
            for _ in 0..count {
                items.push(decode_body(r, element, depth + 1)?);
            }
            Value::List(items)
        }
    };
    Ok(value)
}
