//! Function bus: one RPC/event surface over the local renderer and network
//! clients.
//!
//! Inbound variant arrays are routed by name to handlers with an arity
//! contract. Outbound events are routed to the local renderer, one client,
//! or everyone, with the originating peer optionally excluded.
//!
//! ```text
//! renderer ──ScriptMessage──┐                ┌──▶ LocalSink (buffered until "ready")
//!                           ├─▶ FunctionBus ─┤
//! clients ───on_message─────┘       │        └──▶ RemoteSink (send / broadcast)
//!                                   ▼
//!                          UiQueue ─▶ HostModel (on idle)
//! ```
//!
//! [`HostBridge`] installs the built-in functions (`setParameterValue`,
//! `getWidth`, `ready`, `broadcast`, ...) and keeps newly connected clients
//! in sync with host state.

pub mod bus;
pub mod error;
pub mod host;
pub mod queue;
pub mod route;
pub mod sink;

#[cfg(test)]
mod test_support;

pub use bus::{FunctionBus, Handler, LinkState, DEFAULT_PENDING_LIMIT};
pub use error::{BusError, Result};
pub use host::{BridgeConfig, HostBridge, HostModel, PORT_STATE_KEY};
pub use queue::UiQueue;
pub use route::{Destination, Origin};
pub use sink::{
    bind_network, bind_renderer, LocalSink, NetworkBinding, NetworkSink, RemoteSink, WireProtocol,
};
