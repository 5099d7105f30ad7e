use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_frame, encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// `tokio_util` codec over the same wire format as [`crate::FrameReader`].
#[derive(Debug, Clone, Default)]
pub struct BusCodec {
    config: FrameConfig,
}

impl BusCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }
}

impl Decoder for BusCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.config.max_payload_size, self.config.byte_order)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::ChannelClosed),
        }
    }
}

impl Encoder<Frame> for BusCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::Malformed {
                length: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame.opcode, &frame.payload, self.config.byte_order, dst)
    }
}
