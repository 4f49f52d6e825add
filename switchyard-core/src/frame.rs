//! Wire frame codec for the broker's TCP transport.
//!
//! Every frame is `[flags][length][payload]`: one flags byte, then a length
//! that is a single byte for short frames or a big-endian `u64` when the
//! `LONG` bit is set. The `MORE` bit chains frames into a multipart message.
//! Reserved flag bits must be zero.

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Result, TransportError};

/// More frames follow in this message.
pub const FLAG_MORE: u8 = 0x01;
/// Length is encoded as a big-endian `u64`.
pub const FLAG_LONG: u8 = 0x02;

const FLAG_RESERVED: u8 = !(FLAG_MORE | FLAG_LONG);

/// Default cap on a single frame body.
pub const DEFAULT_MAX_FRAME: usize = 16 * 1024 * 1024;

/// A decoded wire frame
#[derive(Debug, Clone)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    #[inline]
    #[must_use]
    pub const fn more(&self) -> bool {
        (self.flags & FLAG_MORE) != 0
    }
}

/// Stateful frame decoder
///
/// Fast path:
/// - Entire frame present → zero-copy slice of the read buffer
///
/// Slow path:
/// - Fragmented frame → reassemble into `staging`
pub struct FrameDecoder {
    max_frame: usize,
    // Fragmentation state
    pending_flags: Option<u8>,
    expected_body_len: usize,
    staging: BytesMut,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame(DEFAULT_MAX_FRAME)
    }

    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            pending_flags: None,
            expected_body_len: 0,
            staging: BytesMut::new(),
        }
    }

    /// Decode a single frame from `src`
    ///
    /// Returns:
    /// - `Ok(Some(frame))` → frame decoded
    /// - `Ok(None)` → need more data
    /// - `Err` → protocol violation
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // === Reassembly mode ===
        if let Some(flags) = self.pending_flags {
            let needed = self.expected_body_len - self.staging.len();
            let take = needed.min(src.len());
            self.staging.extend_from_slice(&src.split_to(take));

            if self.staging.len() < self.expected_body_len {
                return Ok(None);
            }

            let payload = self.staging.split().freeze();
            self.pending_flags = None;
            self.expected_body_len = 0;

            return Ok(Some(Frame { flags, payload }));
        }

        // === Header parsing ===
        if src.len() < 2 {
            return Ok(None);
        }

        let flags = src[0];
        if (flags & FLAG_RESERVED) != 0 {
            return Err(TransportError::invalid_frame("reserved flag bits set"));
        }

        let is_long = (flags & FLAG_LONG) != 0;
        let header_len = if is_long { 9 } else { 2 };

        if src.len() < header_len {
            return Ok(None);
        }

        // === Body length ===
        let body_len = if is_long {
            let mut len_bytes = &src[1..9];
            let size = len_bytes.get_u64();
            size as usize
        } else {
            src[1] as usize
        };

        if body_len > self.max_frame {
            return Err(TransportError::FrameTooLarge {
                size: body_len,
                max: self.max_frame,
            });
        }

        let total_len = header_len + body_len;

        // === Fast path: entire frame present ===
        if src.len() >= total_len {
            src.advance(header_len);
            let payload = src.split_to(body_len).freeze();
            return Ok(Some(Frame { flags, payload }));
        }

        // === Slow path: fragmentation ===
        src.advance(header_len);
        self.pending_flags = Some(flags);
        self.expected_body_len = body_len;
        self.staging.clear();
        let available = src.len();
        self.staging.extend_from_slice(&src.split_to(available));

        Ok(None)
    }
}

/// Encode a multipart message directly into a buffer.
///
/// Reuses the provided `BytesMut`, avoiding allocations on the hot path.
/// The last frame of the message has the `MORE` bit cleared.
pub fn encode_multipart(msg: &[Bytes], buf: &mut BytesMut) {
    for (i, part) in msg.iter().enumerate() {
        let more = i < msg.len() - 1;
        let is_long = part.len() > u8::MAX as usize;

        let mut flags = 0u8;
        if more {
            flags |= FLAG_MORE;
        }
        if is_long {
            flags |= FLAG_LONG;
        }

        buf.reserve(if is_long { 9 } else { 2 } + part.len());
        buf.extend_from_slice(&[flags]);

        if is_long {
            buf.extend_from_slice(&(part.len() as u64).to_be_bytes());
        } else {
            buf.extend_from_slice(&[part.len() as u8]);
        }

        buf.extend_from_slice(part);
    }
}

/// Collects decoded frames into complete multipart messages.
#[derive(Debug, Default)]
pub struct MultipartAssembler {
    parts: Vec<Bytes>,
}

impl MultipartAssembler {
    /// Push a frame; returns the full message when the final frame arrives.
    pub fn push(&mut self, frame: Frame) -> Option<Vec<Bytes>> {
        let more = frame.more();
        self.parts.push(frame.payload);
        if more {
            None
        } else {
            Some(std::mem::take(&mut self.parts))
        }
    }
}
