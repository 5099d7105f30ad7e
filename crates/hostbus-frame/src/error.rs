/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The declared length is negative when read as a signed 32-bit value or
    /// exceeds the configured maximum.
    #[error("malformed frame (declared length {length}, max {max})")]
    Malformed { length: usize, max: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a complete frame was received.
    #[error("channel closed (incomplete frame)")]
    ChannelClosed,
}

impl FrameError {
    /// True for errors that mean the peer is gone rather than misbehaving.
    pub fn is_disconnect(&self) -> bool {
        match self {
            FrameError::ChannelClosed => true,
            FrameError::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            FrameError::Malformed { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
