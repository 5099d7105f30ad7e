use std::net::SocketAddr;

use crate::client::ClientId;

/// Errors that can occur in network channel operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to bind the listener.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Every port from `first` upward is taken.
    #[error("no available port at or above {first}")]
    NoAvailablePort { first: u16 },

    /// Transport-level error (polling, wake pipe).
    #[error("transport error: {0}")]
    Transport(#[from] hostbus_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hostbus_frame::FrameError),

    /// An I/O error occurred on a socket.
    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No connected client has this handle.
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// The client stopped reading and its outbound queue is full. It is
    /// disconnected on the next service iteration.
    #[error("outbound queue full for client {0}")]
    QueueFull(ClientId),

    /// The channel has been cancelled.
    #[error("network channel closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, NetError>;
