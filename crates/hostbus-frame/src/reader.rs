use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ChannelClosed)` when EOF is reached, whether
    /// or not a partial frame was buffered.
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = self.buffered_frame()? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ChannelClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Decode a frame that is already fully buffered, without touching the stream.
    pub fn buffered_frame(&mut self) -> Result<Option<Frame>> {
        decode_frame(
            &mut self.buf,
            self.config.max_payload_size,
            self.config.byte_order,
        )
    }

    /// Number of bytes read from the stream but not yet returned as frames.
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(unix)]
impl<T: Read + std::os::fd::AsRawFd> FrameReader<T> {
    /// Wait up to `timeout` for the stream to become readable, then read one
    /// complete frame (blocking until it is whole).
    ///
    /// Returns `Ok(None)` when nothing arrived within `timeout`. A frame that
    /// is already buffered is returned immediately.
    pub fn poll_frame(&mut self, timeout: Option<std::time::Duration>) -> Result<Option<Frame>> {
        if let Some(frame) = self.buffered_frame()? {
            return Ok(Some(frame));
        }
        let ready = hostbus_transport::wait_readable(&self.inner, timeout)
            .map_err(transport_to_frame_error)?;
        if !ready {
            return Ok(None);
        }
        self.read_frame().map(Some)
    }
}

#[cfg(unix)]
fn transport_to_frame_error(err: hostbus_transport::TransportError) -> FrameError {
    match err {
        hostbus_transport::TransportError::Io(io)
        | hostbus_transport::TransportError::Poll(io)
        | hostbus_transport::TransportError::Pipe(io) => FrameError::Io(io),
    }
}
