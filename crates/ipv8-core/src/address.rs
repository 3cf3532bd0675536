//! IPv4 socket addresses as they appear on the wire.
//!
//! Every address field in the protocol is 4 bytes of IPv4 followed by a
//! big-endian port. The all-zero value means "unknown".

use crate::error::PacketError;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// Serialized size of an [`Address`].
pub const ADDRESS_SIZE: usize = 6;

/// An IPv4 address and port.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    ip: Ipv4Addr,
    port: u16,
}

impl Address {
    /// `0.0.0.0:0`, the distinguished unknown address.
    pub const EMPTY: Address = Address {
        ip: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    /// Create an address.
    #[must_use]
    pub const fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The IP part.
    #[must_use]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// The port part.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether this is [`Address::EMPTY`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }

    /// Whether the IP is in `127.0.0.0/8`.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    /// Whether the IP is private (RFC 1918) or link-local.
    #[must_use]
    pub fn is_lan(&self) -> bool {
        self.ip.is_private() || self.ip.is_link_local()
    }

    /// Encode as `ip(4) || port(2, big-endian)`.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; ADDRESS_SIZE] {
        let mut out = [0u8; ADDRESS_SIZE];
        out[..4].copy_from_slice(&self.ip.octets());
        out[4..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    /// Decode the first six bytes of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::TooShort`] if fewer than six bytes are available.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < ADDRESS_SIZE {
            return Err(PacketError::TooShort {
                expected: ADDRESS_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            ip: Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]),
            port: u16::from_be_bytes([buf[4], buf[5]]),
        })
    }

    /// Convert to a socket address for the transport.
    #[must_use]
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip, self.port))
    }

    /// Convert from a socket address. IPv6 sources have no representation
    /// in the protocol and map to `None`, except IPv4-mapped ones.
    #[must_use]
    pub fn from_socket_addr(addr: SocketAddr) -> Option<Self> {
        match addr {
            SocketAddr::V4(v4) => Some(v4.into()),
            SocketAddr::V6(v6) => v6
                .ip()
                .to_ipv4_mapped()
                .map(|ip| Self::new(ip, v6.port())),
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<SocketAddrV4> for Address {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(*addr.ip(), addr.port())
    }
}

impl From<Address> for SocketAddrV4 {
    fn from(addr: Address) -> Self {
        SocketAddrV4::new(addr.ip, addr.port)
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<SocketAddrV4>().map(Self::from)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
