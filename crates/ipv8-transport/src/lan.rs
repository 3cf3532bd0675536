//! LAN address estimation.
//!
//! A node bound to `0.0.0.0` does not know which interface address peers on
//! its local network reach it through. The estimate is the bound address when
//! it is a concrete IPv4 address, otherwise the primary non-loopback IPv4
//! address of the host, paired with the bound port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// Estimate the LAN address for a transport bound at `bound`.
///
/// Returns `None` for IPv6 sockets or when no usable interface address exists.
#[must_use]
pub fn estimate_lan(bound: SocketAddr) -> Option<SocketAddrV4> {
    let SocketAddr::V4(bound) = bound else {
        return None;
    };

    if usable(*bound.ip()) {
        return Some(bound);
    }

    match local_ip_address::local_ip() {
        Ok(IpAddr::V4(ip)) if usable(ip) => Some(SocketAddrV4::new(ip, bound.port())),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "no local interface address");
            None
        }
    }
}

fn usable(ip: Ipv4Addr) -> bool {
    !ip.is_unspecified() && !ip.is_loopback()
}
