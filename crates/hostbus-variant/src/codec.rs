//! Binary variant-array encoding.
//!
//! ```text
//! tag 0  null
//! tag 1  false
//! tag 2  true
//! tag 3  number   + 8-byte IEEE-754 double
//! tag 4  string   + UTF-8 bytes + NUL
//! tag 5  binary   + 4-byte length + bytes
//! ```
//!
//! Values are concatenated with no array header; the payload length bounds
//! the array. Multi-byte fields follow the channel's [`ByteOrder`].

use bytes::{BufMut, Bytes, BytesMut};
use hostbus_frame::ByteOrder;

use crate::error::{Result, VariantError};
use crate::value::Variant;

pub const TAG_NULL: u8 = 0;
pub const TAG_FALSE: u8 = 1;
pub const TAG_TRUE: u8 = 2;
pub const TAG_NUMBER: u8 = 3;
pub const TAG_STRING: u8 = 4;
pub const TAG_BINARY: u8 = 5;

/// Encode an array into a fresh buffer.
pub fn encode_array(values: &[Variant], order: ByteOrder) -> Result<Bytes> {
    let mut dst = BytesMut::new();
    encode_array_into(values, order, &mut dst)?;
    Ok(dst.freeze())
}

/// Encode an array, appending to `dst`.
///
/// Nothing is appended if any string contains NUL.
pub fn encode_array_into(values: &[Variant], order: ByteOrder, dst: &mut BytesMut) -> Result<()> {
    for (index, value) in values.iter().enumerate() {
        if let Variant::String(s) = value {
            if s.as_bytes().contains(&0) {
                return Err(VariantError::EmbeddedNul { index });
            }
        }
    }

    dst.reserve(encoded_len(values));
    for value in values {
        match value {
            Variant::Null => dst.put_u8(TAG_NULL),
            Variant::Bool(false) => dst.put_u8(TAG_FALSE),
            Variant::Bool(true) => dst.put_u8(TAG_TRUE),
            Variant::Number(n) => {
                dst.put_u8(TAG_NUMBER);
                order.put_u64(dst, n.to_bits());
            }
            Variant::String(s) => {
                dst.put_u8(TAG_STRING);
                dst.put_slice(s.as_bytes());
                dst.put_u8(0);
            }
            Variant::Binary(b) => {
                dst.put_u8(TAG_BINARY);
                order.put_u32(dst, b.len() as u32);
                dst.put_slice(b);
            }
        }
    }
    Ok(())
}

fn encoded_len(values: &[Variant]) -> usize {
    values
        .iter()
        .map(|value| match value {
            Variant::Null | Variant::Bool(_) => 1,
            Variant::Number(_) => 9,
            Variant::String(s) => s.len() + 2,
            Variant::Binary(b) => b.len() + 5,
        })
        .sum()
}

/// Decode every value in `src`.
///
/// Never reads past the end of `src`; a value cut short is an error rather
/// than a partial result.
pub fn decode_array(src: &[u8], order: ByteOrder) -> Result<Vec<Variant>> {
    let mut values = Vec::new();
    let mut pos = 0usize;

    while pos < src.len() {
        let offset = pos;
        let tag = src[pos];
        pos += 1;
        let rest = &src[pos..];

        let value = match tag {
            TAG_NULL => Variant::Null,
            TAG_FALSE => Variant::Bool(false),
            TAG_TRUE => Variant::Bool(true),
            TAG_NUMBER => {
                let raw: [u8; 8] = rest
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(VariantError::Truncated { tag, offset })?;
                pos += 8;
                Variant::Number(f64::from_bits(order.u64_from(raw)))
            }
            TAG_STRING => {
                let end = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(VariantError::Truncated { tag, offset })?;
                let s = std::str::from_utf8(&rest[..end])
                    .map_err(|_| VariantError::InvalidUtf8 { offset })?;
                pos += end + 1;
                Variant::String(s.to_string())
            }
            TAG_BINARY => {
                let raw: [u8; 4] = rest
                    .get(..4)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(VariantError::Truncated { tag, offset })?;
                let len = order.u32_from(raw) as usize;
                let body = rest
                    .get(4..)
                    .and_then(|b| b.get(..len))
                    .ok_or(VariantError::Truncated { tag, offset })?;
                pos += 4 + len;
                Variant::Binary(Bytes::copy_from_slice(body))
            }
            _ => return Err(VariantError::UnknownTag { tag, offset }),
        };
        values.push(value);
    }

    Ok(values)
}
