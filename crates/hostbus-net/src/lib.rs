//! Multi-client TCP transport for the hostbus function bus.
//!
//! One [`NetworkChannel`] listens on one port and serves any number of
//! clients. Every client gets an independent read accumulator and an
//! ordered write queue; messages travel as little-endian frames
//! (`HELLO`/`TEXT`/`BINARY`, see [`hostbus_frame::opcode::net`]).
//!
//! ```text
//! send / broadcast ──▶ per-client queue ──▶ serve() ──▶ socket
//! socket ──▶ serve() ──▶ NetworkHandler::{on_connect,on_message,on_disconnect}
//! ```

pub mod addr;
pub mod channel;
pub mod client;
pub mod error;
pub mod net_client;
pub mod service;

pub use addr::{find_available_port, local_url, public_url, FIRST_PORT};
pub use channel::{NetworkChannel, NetworkConfig, PortSelection, DEFAULT_MAX_QUEUED_FRAMES};
pub use client::{ClientId, ClientInfo, Message, NetworkHandler};
pub use error::{NetError, Result};
pub use net_client::NetClient;
pub use service::ServiceThread;
