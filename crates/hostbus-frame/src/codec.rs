use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame header: opcode (2) + length (4) = 6 bytes.
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Largest length the wire can express without going negative as a signed
/// 32-bit integer.
pub const MAX_WIRE_LENGTH: usize = i32::MAX as usize;

/// Byte order of the header integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteOrder {
    /// Host-native; both ends share one machine (local pipes).
    #[default]
    Native,
    /// Little-endian; ends may be different machines (network sockets).
    Little,
}

impl ByteOrder {
    pub fn put_u16(self, dst: &mut BytesMut, value: u16) {
        match self {
            ByteOrder::Native => dst.put_slice(&value.to_ne_bytes()),
            ByteOrder::Little => dst.put_u16_le(value),
        }
    }

    pub fn put_u32(self, dst: &mut BytesMut, value: u32) {
        match self {
            ByteOrder::Native => dst.put_slice(&value.to_ne_bytes()),
            ByteOrder::Little => dst.put_u32_le(value),
        }
    }

    pub fn put_u64(self, dst: &mut BytesMut, value: u64) {
        match self {
            ByteOrder::Native => dst.put_slice(&value.to_ne_bytes()),
            ByteOrder::Little => dst.put_u64_le(value),
        }
    }

    pub fn u16_from(self, bytes: [u8; 2]) -> u16 {
        match self {
            ByteOrder::Native => u16::from_ne_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        }
    }

    pub fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Native => u32::from_ne_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        }
    }

    pub fn u64_from(self, bytes: [u8; 8]) -> u64 {
        match self {
            ByteOrder::Native => u64::from_ne_bytes(bytes),
            ByteOrder::Little => u64::from_le_bytes(bytes),
        }
    }
}

/// A framed message tagged with an opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// What this message means; see [`crate::opcode`].
    pub opcode: u16,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(opcode: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    /// A frame with no payload.
    pub fn empty(opcode: u16) -> Self {
        Self::new(opcode, Bytes::new())
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────────┬──────────────────┐
/// │ Opcode (2B)  │ Length (4B)  │ Payload          │
/// │              │              │ (Length bytes)   │
/// └──────────────┴──────────────┴──────────────────┘
/// ```
pub fn encode_frame(
    opcode: u16,
    payload: &[u8],
    order: ByteOrder,
    dst: &mut BytesMut,
) -> Result<()> {
    if payload.len() > MAX_WIRE_LENGTH {
        return Err(FrameError::Malformed {
            length: payload.len(),
            max: MAX_WIRE_LENGTH,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    order.put_u16(dst, opcode);
    order.put_u32(dst, payload.len() as u32);
    dst.put_slice(payload);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet; the
/// buffer is left untouched so more bytes can be appended and decoding
/// retried. On success, consumes the frame bytes from the buffer.
pub fn decode_frame(
    src: &mut BytesMut,
    max_payload: usize,
    order: ByteOrder,
) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let opcode = order.u16_from([src[0], src[1]]);
    let payload_len = order.u32_from([src[2], src[3], src[4], src[5]]) as usize;

    let max = max_payload.min(MAX_WIRE_LENGTH);
    if payload_len > max {
        return Err(FrameError::Malformed {
            length: payload_len,
            max,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Frame { opcode, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Header byte order. Default: host-native.
    pub byte_order: ByteOrder,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            byte_order: ByteOrder::Native,
        }
    }
}

impl FrameConfig {
    /// Defaults for frames crossing a network socket.
    pub fn network() -> Self {
        Self {
            byte_order: ByteOrder::Little,
            ..Self::default()
        }
    }
}
