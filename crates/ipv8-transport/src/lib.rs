//! # IPv8 Transport
//!
//! Datagram transports shared by every overlay running on a node.
//!
//! The overlay engine needs only two things from a transport: send a
//! datagram to an address, and hand over datagrams as they arrive. This
//! crate provides:
//!
//! - [`Transport`]: the async interface the runtime drives
//! - [`UdpTransport`]: Tokio UDP socket configured through `socket2`
//! - [`MemoryNetwork`]: in-process datagram switch for tests and simulations
//! - [`lan`]: estimation of the node's own LAN address

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lan;
pub mod memory;
pub mod transport;
pub mod udp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp::UdpTransport;

/// Largest datagram the receive loop reads in one call.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;
