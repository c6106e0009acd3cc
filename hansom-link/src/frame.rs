//! MCU wire framing.
//!
//! ```text
//! ┌──────────┬───────────┬────────┬──────────────┬───────┐
//! │ 0xAA 0x55│ opcode u8 │ len u8 │ payload[len] │ ck u8 │
//! └──────────┴───────────┴────────┴──────────────┴───────┘
//! ck = XOR of opcode, len and every payload byte
//! ```
//!
//! The byte layout is fixed by the deployed MCU firmware. The decoder
//! accumulates incoming bytes and yields complete frames, tolerating partial
//! reads, concatenated frames and line noise: anything that fails the sync
//! scan, length bound or checksum is skipped and scanning resumes at the
//! next byte.

use thiserror::Error;

pub const SYNC0: u8 = 0xAA;
pub const SYNC1: u8 = 0x55;

/// Payload cap; anything larger on the wire is treated as noise.
pub const MAX_PAYLOAD_BYTES: usize = 64;

/// sync(2) + opcode + len
const HEADER_BYTES: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload too large")]
    PayloadTooLarge,
}

/// A validated frame: opcode plus raw payload, checksum already verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

fn checksum(opcode: u8, payload: &[u8]) -> u8 {
    let mut ck = opcode ^ (payload.len() as u8);
    for b in payload {
        ck ^= b;
    }
    ck
}

/// Encode one frame into a fresh buffer.
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        return Err(FrameError::PayloadTooLarge);
    }

    let mut out = Vec::with_capacity(HEADER_BYTES + payload.len() + 1);
    out.push(SYNC0);
    out.push(SYNC1);
    out.push(opcode);
    out.push(payload.len() as u8);
    out.extend_from_slice(payload);
    out.push(checksum(opcode, payload));
    Ok(out)
}

/// Streaming frame decoder.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the transport.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete, checksum-valid frame, if any.
    ///
    /// Call repeatedly after `extend`; a single read may carry several
    /// frames.
    pub fn next_frame(&mut self) -> Option<RawFrame> {
        loop {
            self.align_to_sync();

            if self.buf.len() < HEADER_BYTES {
                return None;
            }

            let len = self.buf[3] as usize;
            if len > MAX_PAYLOAD_BYTES {
                self.skip_byte();
                continue;
            }

            let total = HEADER_BYTES + len + 1;
            if self.buf.len() < total {
                return None;
            }

            let opcode = self.buf[2];
            let payload = &self.buf[HEADER_BYTES..HEADER_BYTES + len];
            if checksum(opcode, payload) != self.buf[total - 1] {
                self.skip_byte();
                continue;
            }

            let frame = RawFrame {
                opcode,
                payload: payload.to_vec(),
            };
            self.buf.drain(..total);
            return Some(frame);
        }
    }

    /// Frames/bytes discarded as noise so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Discard buffered bytes, e.g. after a transport reconnect.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Drop leading bytes until the buffer starts with the sync pair. A
    /// trailing lone 0xAA is kept: its partner may be in the next read.
    fn align_to_sync(&mut self) {
        let mut start = 0;
        while start < self.buf.len() {
            if self.buf[start] == SYNC0 {
                match self.buf.get(start + 1) {
                    Some(&SYNC1) | None => break,
                    Some(_) => {}
                }
            }
            start += 1;
        }
        if start > 0 {
            self.dropped += start as u64;
            self.buf.drain(..start);
        }
    }

    fn skip_byte(&mut self) {
        if !self.buf.is_empty() {
            self.buf.drain(..1);
            self.dropped += 1;
        }
    }
}

pub(crate) fn u16_le(b: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_le_bytes(b.get(at..at + 2)?.try_into().ok()?))
}

pub(crate) fn u32_le(b: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_le_bytes(b.get(at..at + 4)?.try_into().ok()?))
}

pub(crate) fn i64_le(b: &[u8], at: usize) -> Option<i64> {
    Some(i64::from_le_bytes(b.get(at..at + 8)?.try_into().ok()?))
}
