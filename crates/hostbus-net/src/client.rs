use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

/// Opaque handle for one accepted connection. Never reused within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    /// Wrap a raw id, e.g. one read back from [`as_u64`](Self::as_u64).
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Snapshot of one connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub peer: SocketAddr,
    /// Sent by the client in its `HELLO` frame, if any.
    pub user_agent: Option<String>,
    /// Frames queued but not yet fully written.
    pub pending_frames: usize,
}

/// One application message from or to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl Message {
    pub fn is_binary(&self) -> bool {
        matches!(self, Message::Binary(_))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Message::Text(text) => text.as_bytes(),
            Message::Binary(bytes) => bytes,
        }
    }
}

/// Receives channel events on the thread that calls `serve`.
///
/// Called without any channel lock held, so handlers may call `send` and
/// `broadcast` directly.
pub trait NetworkHandler: Send + Sync {
    fn on_connect(&self, _client: ClientId) {}

    fn on_message(&self, client: ClientId, message: Message);

    fn on_disconnect(&self, _client: ClientId) {}
}
