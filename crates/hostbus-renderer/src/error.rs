use std::path::PathBuf;

/// Errors that can occur while driving a renderer process.
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    /// Transport-level error (pipe creation, polling).
    #[error("transport error: {0}")]
    Transport(#[from] hostbus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hostbus_frame::FrameError),

    /// A payload could not be encoded or decoded.
    #[error("variant error: {0}")]
    Variant(#[from] hostbus_variant::VariantError),

    /// An OS-level failure outside the channel (thread creation, process wait).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The helper executable could not be launched.
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The helper did not send its init frame in time.
    #[error("renderer handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The helper exited before completing the handshake.
    #[error("renderer exited during startup ({0})")]
    ChildExited(std::process::ExitStatus),

    /// The channel is not connected (never started, shut down, or peer gone).
    #[error("renderer not connected")]
    NotConnected,

    /// The helper is not draining its command queue.
    #[error("renderer command queue full ({capacity} frames)")]
    QueueFull { capacity: usize },

    /// A string argument contains NUL and cannot be sent as a C string.
    #[error("string argument contains an embedded NUL")]
    EmbeddedNul,

    /// A payload did not have the shape its opcode requires.
    #[error("invalid {opcode} payload: {reason}")]
    InvalidPayload {
        opcode: &'static str,
        reason: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, RendererError>;
