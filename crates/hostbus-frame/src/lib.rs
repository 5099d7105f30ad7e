//! Opcode-tagged, length-prefixed framing for hostbus channels.
//!
//! Every message is framed with:
//! - A 2-byte opcode identifying the command or event
//! - A 4-byte payload length
//! - `length` raw payload bytes, no delimiters or escaping
//!
//! Header integers are host-native on local pipes and little-endian on
//! network sockets (see [`ByteOrder`]). Decoding is incremental: callers
//! may feed any number of bytes and always get back complete frames.

pub mod codec;
pub mod error;
pub mod opcode;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    decode_frame, encode_frame, ByteOrder, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAX_WIRE_LENGTH,
};
pub use error::{FrameError, Result};
pub use opcode::opcode_name;
pub use reader::FrameReader;
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use async_codec::BusCodec;
