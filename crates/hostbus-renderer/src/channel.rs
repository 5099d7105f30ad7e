use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use hostbus_frame::{opcode_name, Frame, FrameConfig, FrameError, FrameReader, FrameWriter};
use hostbus_transport::{PipeReader, PipeWriter};
use tracing::{debug, warn};

use crate::error::{RendererError, Result};

/// One framed, bidirectional pipe pair to a renderer process.
///
/// Reads and writes are independently locked, so a reader loop blocked on
/// [`LocalChannel::poll`] never delays a writer. Once a write fails or the
/// read side sees EOF the channel stays closed.
pub struct LocalChannel {
    reader: Mutex<FrameReader<PipeReader>>,
    writer: Mutex<FrameWriter<PipeWriter>>,
    closed: AtomicBool,
}

impl LocalChannel {
    pub fn new(reader: PipeReader, writer: PipeWriter, config: FrameConfig) -> Self {
        Self {
            reader: Mutex::new(FrameReader::with_config(reader, config.clone())),
            writer: Mutex::new(FrameWriter::with_config(writer, config)),
            closed: AtomicBool::new(false),
        }
    }

    /// Frame and write one message.
    pub fn send(&self, opcode: u16, payload: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(RendererError::NotConnected);
        }
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| RendererError::NotConnected)?;
        match writer.send(opcode, payload) {
            Ok(()) => {
                debug!(op = opcode_name(opcode), len = payload.len(), "sent frame");
                Ok(())
            }
            Err(err) => {
                warn!(op = opcode_name(opcode), error = %err, "write failed, closing channel");
                self.close();
                Err(if err.is_disconnect() {
                    RendererError::NotConnected
                } else {
                    RendererError::Frame(err)
                })
            }
        }
    }

    /// Wait up to `timeout` for one frame.
    ///
    /// `Ok(None)` means nothing arrived in time. EOF or a protocol error
    /// closes the channel.
    pub fn poll(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut reader = self
            .reader
            .lock()
            .map_err(|_| RendererError::NotConnected)?;
        match reader.poll_frame(Some(timeout)) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                self.close();
                Err(match err {
                    FrameError::ChannelClosed => RendererError::NotConnected,
                    other => RendererError::Frame(other),
                })
            }
        }
    }

    /// Mark the channel closed; subsequent sends fail fast.
    ///
    /// The descriptors themselves are released when the last owner drops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChannel")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use hostbus_frame::opcode;
    use hostbus_transport::pipe_pair;

    use super::*;

    /// Two channels wired back to back.
    fn linked() -> (LocalChannel, LocalChannel) {
        let (a_read, b_write) = pipe_pair().expect("pipe should be created");
        let (b_read, a_write) = pipe_pair().expect("pipe should be created");
        (
            LocalChannel::new(a_read, a_write, FrameConfig::default()),
            LocalChannel::new(b_read, b_write, FrameConfig::default()),
        )
    }

    #[test]
    fn send_and_poll() {
        let (host, renderer) = linked();
        host.send(opcode::NAVIGATE, b"about:blank\0")
            .expect("send should succeed");

        let frame = renderer
            .poll(Duration::from_millis(100))
            .expect("poll should succeed")
            .expect("frame should arrive");
        assert_eq!(frame.opcode, opcode::NAVIGATE);
    }

    #[test]
    fn poll_times_out_quietly() {
        let (host, _renderer) = linked();
        let polled = host
            .poll(Duration::from_millis(10))
            .expect("poll should succeed");
        assert!(polled.is_none());
        assert!(!host.is_closed());
    }

    #[test]
    fn eof_closes_channel() {
        let (host, renderer) = linked();
        drop(renderer);

        let err = host.poll(Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, RendererError::NotConnected));
        assert!(host.is_closed());
        assert!(matches!(
            host.send(opcode::TERMINATE, b""),
            Err(RendererError::NotConnected)
        ));
    }

    #[test]
    fn write_to_departed_peer_closes_channel() {
        let (host, renderer) = linked();
        drop(renderer);

        let err = host.send(opcode::RUN_SCRIPT, b"1\0").unwrap_err();
        assert!(matches!(err, RendererError::NotConnected));
        assert!(host.is_closed());
    }
}
