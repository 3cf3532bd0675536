//! # IPv8 Core
//!
//! Overlay membership and NAT traversal for a peer-to-peer network.
//!
//! This crate provides:
//! - [`Network`]: registry of known addresses, verified peers, advertised
//!   services and blacklists, shared by every overlay of a node
//! - [`WanEstimationLog`]: majority vote over peer reports of our public
//!   address, and a NAT classification derived from it
//! - Signed packet framing and the wire payload codecs
//! - [`Community`]: one overlay, running the introduction/puncture exchange
//! - [`RandomWalk`]: the default discovery strategy
//! - [`Ipv8`]: the runtime driving overlays over a transport
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Ipv8                                │
//! │   (receive loop, walk tick, LAN estimation, lifecycle lock)   │
//! ├──────────────────────────────────────────────────────────────┤
//! │        Community  ◄──  DiscoveryStrategy (RandomWalk)         │
//! │   (framing, dispatch, introduction / puncture state machine)  │
//! ├──────────────────────────────────────────────────────────────┤
//! │            Network  ──  WanEstimationLog                      │
//! │   (addresses, verified peers, services, blacklists)           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod community;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod network;
pub mod packet;
pub mod payload;
pub mod peer;
pub mod runtime;
pub mod strategy;

pub use address::{ADDRESS_SIZE, Address};
pub use community::{Community, CommunityBuilder, MessageHandler};
pub use config::{
    CommunitySettings, DEFAULT_MAX_PEERS, Ipv8Config, OverlayConfig, RandomWalkConfig,
    WalkerConfig,
};
pub use endpoint::{Endpoint, TransportEndpoint};
pub use error::{Ipv8Error, PacketError, Result};
pub use network::{Introduction, MAJORITY_INPUT_SIZE, Network, WanEstimationLog, WanLogItem};
pub use packet::{
    Authenticated, HEADER_SIZE, PREFIX_SIZE, Packet, PacketBuilder, ServiceId, Unsigned,
    message_id,
};
pub use payload::{ConnectionType, Deserializable, Serializable};
pub use peer::{MemberId, Peer};
pub use runtime::Ipv8;
pub use strategy::{DiscoveryStrategy, RandomWalk};
