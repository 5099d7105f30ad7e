use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, UdpSocket};

use tracing::debug;

use crate::error::{NetError, Result};

/// First port of the dynamic/private range, where probing starts by default.
pub const FIRST_PORT: u16 = 49152;

/// Find the lowest port at or above `first` that `ip` can bind.
///
/// Only "address in use" moves the probe on; any other bind failure is
/// returned as-is.
pub fn find_available_port(ip: IpAddr, first: u16) -> Result<u16> {
    bind_from(ip, first).map(|(_, port)| port)
}

/// Bind a listener on the lowest free port at or above `first`.
pub(crate) fn bind_from(ip: IpAddr, first: u16) -> Result<(TcpListener, u16)> {
    for port in first..=u16::MAX {
        let addr = SocketAddr::new(ip, port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                debug!(port, "port available");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == ErrorKind::AddrInUse => continue,
            Err(source) => return Err(NetError::Bind { addr, source }),
        }
    }
    Err(NetError::NoAvailablePort { first })
}

/// URL for a browser on this machine.
pub fn local_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// URL for other machines on the network, if a route-facing address exists.
///
/// "Connects" a UDP socket to a public resolver and reads back the local
/// address the OS picked; no packet is sent.
pub fn public_url(port: u16) -> Option<String> {
    public_ip().map(|ip| format!("http://{ip}:{port}"))
}

fn public_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 53)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn probing_skips_bound_ports() {
        // Hold 49152..=49160; anything else already in use stays in use too.
        let _held: Vec<TcpListener> = (FIRST_PORT..=FIRST_PORT + 8)
            .filter_map(|port| TcpListener::bind((LOOPBACK, port)).ok())
            .collect();

        let port = find_available_port(LOOPBACK, FIRST_PORT).expect("a port should be free");
        assert!(port >= FIRST_PORT + 9);
        assert!(TcpListener::bind((LOOPBACK, port)).is_ok());
        if port > FIRST_PORT + 9 {
            // Only acceptable if something outside this test holds 49161.
            assert!(TcpListener::bind((LOOPBACK, FIRST_PORT + 9)).is_err());
        }
    }

    #[test]
    fn urls() {
        assert_eq!(local_url(49152), "http://127.0.0.1:49152");
        if let Some(url) = public_url(8080) {
            assert!(url.starts_with("http://"));
            assert!(url.ends_with(":8080"));
        }
    }
}
