//! Best-effort discovery of this machine's LAN address for the startup banner.

use std::net::{IpAddr, UdpSocket};
use tracing::debug;

/// Address routed toward the public internet. No packet is sent: connecting a
/// UDP socket only selects a route and therefore a local address.
const ROUTE_TARGET: &str = "8.8.8.8:80";

/// The local address the OS would use for outbound traffic, if any.
pub fn local_ip() -> Option<IpAddr> {
    let discover = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(ROUTE_TARGET)?;
        Ok(socket.local_addr()?.ip())
    };
    match discover() {
        Ok(ip) if !ip.is_unspecified() => Some(ip),
        Ok(_) => None,
        Err(e) => {
            debug!("Local IP discovery failed: {}", e);
            None
        }
    }
}

/// The URL other devices on the network should open.
pub fn lan_url(port: u16) -> String {
    let host = local_ip()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "localhost".to_string());
    format!("http://{}:{}", host, port)
}
