//! Message bus between a constrained host process and its renderers.
//!
//! hostbus lets a host that cannot run a UI toolkit itself drive a user
//! interface in a separate renderer process, or in any number of network
//! clients, through one named-function RPC/event bus.
//!
//! # Crate Structure
//!
//! - [`transport`]: Anonymous pipes and readiness polling
//! - [`frame`]: `[opcode][length][payload]` framing, blocking and async
//! - [`variant`]: Tagged argument values and their binary/JSON encodings
//! - [`renderer`]: Child-process renderer supervisor and reader loop
//! - [`net`]: Multi-client TCP channel with broadcast
//! - [`bus`]: Function bus, host bridge and transport bindings

/// Re-export transport types.
pub mod transport {
    pub use hostbus_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hostbus_frame::*;
}

/// Re-export variant types.
pub mod variant {
    pub use hostbus_variant::*;
}

/// Re-export renderer types.
pub mod renderer {
    pub use hostbus_renderer::*;
}

/// Re-export network types.
pub mod net {
    pub use hostbus_net::*;
}

/// Re-export function bus types.
pub mod bus {
    pub use hostbus_bus::*;
}

pub use hostbus_bus::{Destination, FunctionBus, HostBridge, HostModel, Origin};
pub use hostbus_variant::Variant;
