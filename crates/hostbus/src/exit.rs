use std::fmt;
use std::io;

use hostbus_bus::BusError;
use hostbus_frame::FrameError;
use hostbus_net::NetError;
use hostbus_renderer::RendererError;
use hostbus_transport::TransportError;
use hostbus_variant::VariantError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Malformed { .. } => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ChannelClosed => CliError::new(FAILURE, format!("{context}: {err}")),
    }
}

pub fn variant_error(context: &str, err: VariantError) -> CliError {
    CliError::new(DATA_INVALID, format!("{context}: {err}"))
}

pub fn net_error(context: &str, err: NetError) -> CliError {
    match err {
        NetError::Bind { source, .. } | NetError::Io(source) => io_error(context, source),
        NetError::Transport(err) => transport_error(context, err),
        NetError::Frame(err) => frame_error(context, err),
        NetError::NoAvailablePort { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        NetError::UnknownClient(_) | NetError::QueueFull(_) | NetError::Closed => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn renderer_error(context: &str, err: RendererError) -> CliError {
    match err {
        RendererError::Transport(err) => transport_error(context, err),
        RendererError::Frame(err) => frame_error(context, err),
        RendererError::Variant(err) => variant_error(context, err),
        RendererError::Io(source) | RendererError::Spawn { source, .. } => {
            io_error(context, source)
        }
        RendererError::HandshakeTimeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        RendererError::EmbeddedNul | RendererError::InvalidPayload { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        RendererError::ChildExited(_)
        | RendererError::NotConnected
        | RendererError::QueueFull { .. } => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn bus_error(context: &str, err: BusError) -> CliError {
    match err {
        BusError::Renderer(err) => renderer_error(context, err),
        BusError::Net(err) => net_error(context, err),
        BusError::Variant(err) => variant_error(context, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_handshake_timeout_to_timeout_code() {
        let err = renderer_error(
            "start failed",
            RendererError::HandshakeTimeout(std::time::Duration::from_secs(3)),
        );
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("start failed: "));
    }

    #[test]
    fn maps_missing_helper_to_internal() {
        let err = renderer_error(
            "start failed",
            RendererError::Spawn {
                path: "/nope".into(),
                source: io::Error::from(io::ErrorKind::NotFound),
            },
        );
        assert_eq!(err.code, INTERNAL);
    }

    #[test]
    fn maps_refused_connection_to_failure() {
        let err = net_error(
            "connect failed",
            NetError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)),
        );
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn maps_malformed_frame_to_data_invalid() {
        let err = frame_error("recv failed", FrameError::Malformed { length: 9, max: 4 });
        assert_eq!(err.code, DATA_INVALID);
    }
}
