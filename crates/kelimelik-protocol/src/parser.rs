//! Frame parser: turns an arbitrarily chunked byte stream into packets.
//!
//! TCP hands us bytes in whatever chunks it likes. A single read may hold
//! half a size field, or three whole frames and the start of a fourth. The
//! parser is a small state machine that copies exactly as many bytes as the
//! current phase still needs, so it behaves the same whether it is fed one
//! byte at a time or everything at once.
//!
//! ```text
//!          4 bytes read                N bytes read
//! Length ───────────────→ Body ───────────────────→ decode, emit → Length
//!    │  N == 0: absorbed, back to Length
//!    └─ N > max ─→ Discard (skip N bytes, emit FrameTooLarge) ─→ Length
//! ```

use tracing::{debug, trace};

use crate::packet::LENGTH_PREFIX_LEN;
use crate::{DecodeError, Packet};

/// Default upper bound on a single frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Collecting the 4-byte size field.
    Length,
    /// Collecting the frame body.
    Body,
    /// Skipping the body of a frame we refused to buffer.
    Discard,
}

/// Stateful reassembler for length-prefixed frames.
///
/// ```rust
/// use kelimelik_protocol::{FrameParser, Packet};
///
/// let bytes = Packet::new("GameModule_playerStats").value(3).encode().unwrap();
/// let (first, rest) = bytes.split_at(5);
///
/// let mut parser = FrameParser::new();
/// assert_eq!(parser.advance(first).count(), 0);
///
/// let packets: Vec<_> = parser.advance(rest).collect();
/// assert_eq!(packets.len(), 1);
/// assert_eq!(packets[0].as_ref().unwrap().header, "GameModule_playerStats");
/// ```
#[derive(Debug)]
pub struct FrameParser {
    /// Scratch buffer holding the size field and body of the current frame.
    /// Only ever grows.
    buffer: Vec<u8>,
    /// Next index to write to in `buffer`.
    head: usize,
    /// Bytes still needed to finish the current phase.
    remaining: usize,
    phase: Phase,
    max_frame_size: u32,
    consecutive_errors: u32,
}

impl FrameParser {
    /// Creates a parser with the default frame size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a parser that refuses frames with bodies above `max_frame_size`.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: vec![0; LENGTH_PREFIX_LEN],
            head: 0,
            remaining: LENGTH_PREFIX_LEN,
            phase: Phase::Length,
            max_frame_size,
            consecutive_errors: 0,
        }
    }

    /// Feeds a chunk of bytes and returns the frames it completes.
    ///
    /// The returned iterator is lazy, but the whole chunk is always consumed:
    /// dropping the iterator early drains the rest of the chunk, discarding
    /// the frames it would have yielded.
    pub fn advance<'p, 'a>(&'p mut self, chunk: &'a [u8]) -> Frames<'p, 'a> {
        Frames {
            parser: self,
            input: chunk,
        }
    }

    /// Feeds a single byte.
    pub fn advance_byte(&mut self, byte: u8) -> Option<Result<Packet, DecodeError>> {
        let mut input: &[u8] = &[byte];
        self.step(&mut input)
    }

    /// `true` when the parser sits exactly on a frame boundary.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Length && self.head == 0
    }

    /// Number of frames in a row that failed to decode.
    /// Reset by every successfully decoded frame.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Current size of the scratch buffer.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The configured frame body limit.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Consumes bytes from the front of `input` until either a frame is
    /// complete or the input runs out. Returns the completed frame, if any.
    fn step(&mut self, input: &mut &[u8]) -> Option<Result<Packet, DecodeError>> {
        while !input.is_empty() {
            let take = self.remaining.min(input.len());
            let (now, later) = input.split_at(take);
            *input = later;
            self.remaining -= take;

            match self.phase {
                Phase::Discard => {
                    if self.remaining == 0 {
                        trace!("oversized frame skipped");
                        self.reset();
                    }
                }
                Phase::Length => {
                    self.collect(now);
                    if self.remaining == 0 {
                        if let Some(err) = self.begin_body() {
                            return Some(Err(err));
                        }
                    }
                }
                Phase::Body => {
                    self.collect(now);
                    if self.remaining == 0 {
                        return Some(self.finish_frame());
                    }
                }
            }
        }
        None
    }

    fn collect(&mut self, bytes: &[u8]) {
        self.buffer[self.head..self.head + bytes.len()].copy_from_slice(bytes);
        self.head += bytes.len();
    }

    /// Reads the size field and sets up the body phase.
    fn begin_body(&mut self) -> Option<DecodeError> {
        let size = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);

        if size == 0 {
            trace!("empty frame absorbed");
            self.reset();
            return None;
        }

        if size > self.max_frame_size {
            debug!(size, max = self.max_frame_size, "refusing oversized frame");
            self.consecutive_errors += 1;
            self.phase = Phase::Discard;
            self.head = 0;
            self.remaining = size as usize;
            return Some(DecodeError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }

        let total = LENGTH_PREFIX_LEN + size as usize;
        if self.buffer.len() < total {
            self.buffer.resize(total, 0);
        }
        self.phase = Phase::Body;
        self.remaining = size as usize;
        None
    }

    /// Decodes the collected frame and returns to the length phase.
    fn finish_frame(&mut self) -> Result<Packet, DecodeError> {
        let result = Packet::decode(&self.buffer[..self.head]);
        match &result {
            Ok(packet) => {
                trace!(header = %packet.header, len = self.head, "frame decoded");
                self.consecutive_errors = 0;
            }
            Err(err) => {
                debug!(error = %err, len = self.head, "frame failed to decode, discarded");
                self.consecutive_errors += 1;
            }
        }
        self.reset();
        result
    }

    fn reset(&mut self) {
        self.phase = Phase::Length;
        self.head = 0;
        self.remaining = LENGTH_PREFIX_LEN;
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of frames completed by one [`FrameParser::advance`] call.
pub struct Frames<'p, 'a> {
    parser: &'p mut FrameParser,
    input: &'a [u8],
}

impl Frames<'_, '_> {
    /// The parser's corrupt-frame streak after the last yielded item.
    pub fn consecutive_errors(&self) -> u32 {
        self.parser.consecutive_errors
    }
}

impl Iterator for Frames<'_, '_> {
    type Item = Result<Packet, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.step(&mut self.input)
    }
}

impl Drop for Frames<'_, '_> {
    fn drop(&mut self) {
        while !self.input.is_empty() {
            let _ = self.parser.step(&mut self.input);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn frame(header: &str, values: Vec<Value>) -> Vec<u8> {
        Packet::with_values(header, values).encode().unwrap().to_vec()
    }

    #[test]
    fn test_partial_length_field_waits() {
        let bytes = frame("A", vec![]);
        let mut parser = FrameParser::new();
        assert_eq!(parser.advance(&bytes[..2]).count(), 0);
        assert!(!parser.is_idle());
        let out: Vec<_> = parser.advance(&bytes[2..]).collect();
        assert_eq!(out, vec![Ok(Packet::new("A"))]);
        assert!(parser.is_idle());
    }

    #[test]
    fn test_empty_frame_is_absorbed() {
        let mut bytes = vec![0, 0, 0, 0];
        bytes.extend(frame("B", vec![Value::Int32(1)]));
        let mut parser = FrameParser::new();
        let out: Vec<_> = parser.advance(&bytes).collect();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().header, "B");
    }

    #[test]
    fn test_scratch_buffer_only_grows() {
        let big = frame("Big", vec![Value::from("x".repeat(1000))]);
        let small = frame("S", vec![]);
        let mut parser = FrameParser::new();

        assert_eq!(parser.advance(&big).count(), 1);
        let grown = parser.capacity();
        assert_eq!(grown, big.len());

        assert_eq!(parser.advance(&small).count(), 1);
        assert_eq!(parser.capacity(), grown);
    }

    #[test]
    fn test_dropping_iterator_still_consumes_chunk() {
        let mut bytes = frame("One", vec![]);
        bytes.extend(frame("Two", vec![]));
        bytes.extend(&frame("Three", vec![])[..3]);

        let mut parser = FrameParser::new();
        {
            let mut frames = parser.advance(&bytes);
            assert_eq!(frames.next().unwrap().unwrap().header, "One");
        }
        // "Two" was drained and dropped, "Three" is half way through its size field.
        assert!(!parser.is_idle());
        let rest = frame("Three", vec![]);
        let out: Vec<_> = parser.advance(&rest[3..]).collect();
        assert_eq!(out, vec![Ok(Packet::new("Three"))]);
    }

    #[test]
    fn test_corrupt_body_resynchronises() {
        // Size 3, header length 5 but only 1 byte of header follows.
        let mut bytes = vec![0, 0, 0, 3, 0, 5, b'x'];
        bytes.extend(frame("Good", vec![]));

        let mut parser = FrameParser::new();
        let out: Vec<_> = parser.advance(&bytes).collect();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], Err(DecodeError::Truncated { .. })));
        assert_eq!(out[1], Ok(Packet::new("Good")));
        assert_eq!(parser.consecutive_errors(), 0);
    }

    #[test]
    fn test_consecutive_errors_accumulate() {
        let bad = [0, 0, 0, 1, 0xFF];
        let mut parser = FrameParser::new();
        for expected in 1..=3 {
            let out: Vec<_> = parser.advance(&bad).collect();
            assert_eq!(out.len(), 1);
            assert!(out[0].is_err());
            assert_eq!(parser.consecutive_errors(), expected);
        }
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let mut bytes = vec![0, 0, 0, 10];
        bytes.extend_from_slice(&[0xAA; 10]);
        bytes.extend(frame("After", vec![]));

        let mut parser = FrameParser::with_max_frame_size(8);
        let out: Vec<_> = parser.advance(&bytes).collect();
        assert_eq!(
            out[0],
            Err(DecodeError::FrameTooLarge { size: 10, max: 8 })
        );
        assert_eq!(out[1], Ok(Packet::new("After")));
        assert_eq!(parser.capacity(), LENGTH_PREFIX_LEN + "After".len() + 3);
    }

    #[test]
    fn test_advance_byte_yields_on_last_byte() {
        let bytes = frame("Byte", vec![Value::Int32(5)]);
        let mut parser = FrameParser::new();
        let (last, init) = bytes.split_last().unwrap();
        for b in init {
            assert!(parser.advance_byte(*b).is_none());
        }
        let packet = parser.advance_byte(*last).unwrap().unwrap();
        assert_eq!(packet.get(0), Some(&Value::Int32(5)));
    }
}
