//! Payload layouts for the local renderer opcodes.
//!
//! All multi-byte fields are host-native: both ends run on one machine.

use bytes::{BufMut, Bytes, BytesMut};
use hostbus_frame::{opcode, ByteOrder, Frame};
use hostbus_variant::{decode_array, encode_json_array, Variant};

use crate::error::{RendererError, Result};

/// Parameters for [`opcode::REALIZE`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizeConfig {
    /// Native handle of the window to embed into; 0 for a top-level window.
    pub parent: u64,
    /// Background color as 0xRRGGBBAA.
    pub background_color: u32,
    pub width: u32,
    pub height: u32,
    pub user_agent: String,
}

impl Default for RealizeConfig {
    fn default() -> Self {
        Self {
            parent: 0,
            background_color: 0x0000_00ff,
            width: 800,
            height: 600,
            user_agent: String::new(),
        }
    }
}

impl RealizeConfig {
    pub fn encode(&self) -> Result<Bytes> {
        if self.user_agent.as_bytes().contains(&0) {
            return Err(RendererError::EmbeddedNul);
        }
        let order = ByteOrder::Native;
        let mut dst = BytesMut::with_capacity(20 + self.user_agent.len() + 1);
        order.put_u64(&mut dst, self.parent);
        order.put_u32(&mut dst, self.background_color);
        order.put_u32(&mut dst, self.width);
        order.put_u32(&mut dst, self.height);
        dst.put_slice(self.user_agent.as_bytes());
        dst.put_u8(0);
        Ok(dst.freeze())
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let invalid = |reason| RendererError::InvalidPayload {
            opcode: "REALIZE",
            reason,
        };
        if payload.len() < 21 {
            return Err(invalid("shorter than fixed fields"));
        }
        let order = ByteOrder::Native;
        let u32_at = |at: usize| order.u32_from([payload[at], payload[at + 1], payload[at + 2], payload[at + 3]]);
        let mut parent = [0u8; 8];
        parent.copy_from_slice(&payload[..8]);

        Ok(Self {
            parent: order.u64_from(parent),
            background_color: u32_at(8),
            width: u32_at(12),
            height: u32_at(16),
            user_agent: decode_c_string(&payload[20..]).map_err(|_| invalid("bad user agent"))?,
        })
    }
}

/// UTF-8 text plus one NUL terminator.
pub fn encode_c_string(text: &str) -> Result<Bytes> {
    if text.as_bytes().contains(&0) {
        return Err(RendererError::EmbeddedNul);
    }
    let mut dst = BytesMut::with_capacity(text.len() + 1);
    dst.put_slice(text.as_bytes());
    dst.put_u8(0);
    Ok(dst.freeze())
}

/// Text up to the first NUL (or the end of the payload).
pub fn decode_c_string(payload: &[u8]) -> Result<String> {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    std::str::from_utf8(&payload[..end])
        .map(str::to_string)
        .map_err(|_| RendererError::InvalidPayload {
            opcode: "string",
            reason: "not UTF-8",
        })
}

pub fn encode_size(width: u32, height: u32) -> Bytes {
    let mut dst = BytesMut::with_capacity(8);
    ByteOrder::Native.put_u32(&mut dst, width);
    ByteOrder::Native.put_u32(&mut dst, height);
    dst.freeze()
}

pub fn decode_size(payload: &[u8]) -> Result<(u32, u32)> {
    match payload {
        [w0, w1, w2, w3, h0, h1, h2, h3] => Ok((
            ByteOrder::Native.u32_from([*w0, *w1, *w2, *w3]),
            ByteOrder::Native.u32_from([*h0, *h1, *h2, *h3]),
        )),
        _ => Err(RendererError::InvalidPayload {
            opcode: "SET_SIZE",
            reason: "expected 8 bytes",
        }),
    }
}

pub fn encode_pixel_ratio(ratio: f32) -> Bytes {
    Bytes::copy_from_slice(&ratio.to_ne_bytes())
}

pub fn decode_pixel_ratio(payload: &[u8]) -> Result<f32> {
    let raw: [u8; 4] = payload
        .try_into()
        .map_err(|_| RendererError::InvalidPayload {
            opcode: "HANDLE_INIT",
            reason: "expected 4 bytes",
        })?;
    Ok(f32::from_ne_bytes(raw))
}

/// Script that delivers `values` to the page as a `message` event on `window.host`.
pub fn dispatch_script(values: &[Variant]) -> String {
    format!(
        "window.host.dispatchEvent(new CustomEvent('message',{{detail:{}}}));",
        encode_json_array(values)
    )
}

/// Something the renderer told the host.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererEvent {
    /// Handshake: the renderer is up.
    Init { pixel_ratio: f32 },
    /// The current page finished loading.
    LoadFinished,
    /// A script posted a message to the host.
    ScriptMessage(Vec<Variant>),
    /// A script wrote to its console.
    Console { tag: String, text: String },
    /// The channel closed underneath the reader.
    Disconnected,
}

impl RendererEvent {
    /// Interpret one frame from the renderer.
    ///
    /// Returns `Ok(None)` for opcodes that are not renderer events.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>> {
        let event = match frame.opcode {
            opcode::HANDLE_INIT => RendererEvent::Init {
                pixel_ratio: decode_pixel_ratio(&frame.payload)?,
            },
            opcode::HANDLE_LOAD_FINISHED => RendererEvent::LoadFinished,
            opcode::HANDLE_SCRIPT_MESSAGE => {
                let args = decode_array(&frame.payload, ByteOrder::Native)?;
                console_message(&args).unwrap_or(RendererEvent::ScriptMessage(args))
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// `["console", tag, text]` is reserved for console output.
fn console_message(args: &[Variant]) -> Option<RendererEvent> {
    match args {
        [Variant::String(name), Variant::String(tag), text] if name == "console" => {
            Some(RendererEvent::Console {
                tag: tag.clone(),
                text: match text {
                    Variant::String(s) => s.clone(),
                    other => other.to_string(),
                },
            })
        }
        _ => None,
    }
}
