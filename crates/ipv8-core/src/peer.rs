//! Peer identity records.
//!
//! A [`Peer`] is a value: the registry stores one copy per member id and
//! merges updates into it field by field. Callers hold snapshots and go back
//! to the registry by [`MemberId`] for fresh state.

use crate::address::Address;
use ipv8_crypto::{Key, MEMBER_ID_SIZE, PublicKey};
use std::fmt;
use std::time::Instant;

/// SHA-1 of a peer's serialized public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId([u8; MEMBER_ID_SIZE]);

impl MemberId {
    /// Wrap raw hash bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; MEMBER_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Member id of a public key.
    #[must_use]
    pub fn of(key: &PublicKey) -> Self {
        Self(key.key_to_hash())
    }

    /// Raw hash bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; MEMBER_ID_SIZE] {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemberId({})", hex::encode(&self.0[..8]))
    }
}

/// A known participant of the overlay.
#[derive(Clone)]
pub struct Peer {
    key: Key,
    mid: MemberId,
    address: Address,
    lan_address: Address,
    wan_address: Address,
    intro: bool,
    lamport_timestamp: u64,
    last_request: Option<Instant>,
    last_response: Option<Instant>,
}

impl Peer {
    /// Create a peer seen at `address`.
    ///
    /// `intro` marks a peer we only heard about through an introduction; a
    /// peer that contacted us directly starts with `last_response` set.
    #[must_use]
    pub fn new(key: impl Into<Key>, address: Address, intro: bool) -> Self {
        let key = key.into();
        let mid = MemberId::of(&key.pub_key());
        Self {
            key,
            mid,
            address,
            lan_address: Address::EMPTY,
            wan_address: Address::EMPTY,
            intro,
            lamport_timestamp: 0,
            last_request: None,
            last_response: if intro { None } else { Some(Instant::now()) },
        }
    }

    /// Copy of this peer with the addresses it reports for itself.
    #[must_use]
    pub fn with_reported_addresses(mut self, lan: Address, wan: Address) -> Self {
        self.lan_address = lan;
        self.wan_address = wan;
        self
    }

    /// The key capability.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.key.pub_key()
    }

    /// Stable identifier.
    #[must_use]
    pub fn mid(&self) -> MemberId {
        self.mid
    }

    /// Address this peer last contacted us from.
    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    /// LAN address the peer believes it has.
    #[must_use]
    pub fn lan_address(&self) -> Address {
        self.lan_address
    }

    /// WAN address the peer believes it has.
    #[must_use]
    pub fn wan_address(&self) -> Address {
        self.wan_address
    }

    /// Whether we learned about this peer through an introduction.
    #[must_use]
    pub fn is_intro(&self) -> bool {
        self.intro
    }

    /// Highest logical clock value seen from this peer.
    #[must_use]
    pub fn lamport_timestamp(&self) -> u64 {
        self.lamport_timestamp
    }

    /// When we last sent something to this peer.
    #[must_use]
    pub fn last_request(&self) -> Option<Instant> {
        self.last_request
    }

    /// When we last heard from this peer.
    #[must_use]
    pub fn last_response(&self) -> Option<Instant> {
        self.last_response
    }

    /// Reachable over the transport.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.address.is_empty()
    }

    /// Advance the Lamport clock to `max(current, timestamp)` and mark the
    /// peer as heard from.
    pub fn update_clock(&mut self, timestamp: u64) {
        self.lamport_timestamp = self.lamport_timestamp.max(timestamp);
        self.last_response = Some(Instant::now());
    }

    pub(crate) fn set_address(&mut self, address: Address) {
        self.address = address;
    }

    pub(crate) fn touch_last_request(&mut self) {
        self.last_request = Some(Instant::now());
    }

    pub(crate) fn touch_last_response(&mut self) {
        self.last_response = Some(Instant::now());
    }

    /// Fold a newer observation of the same member into this record.
    ///
    /// Non-empty addresses overwrite, empty ones never do. The clock and
    /// liveness timestamps only move forward.
    pub(crate) fn merge(&mut self, other: &Peer) {
        debug_assert_eq!(self.mid, other.mid);
        if !other.address.is_empty() {
            self.address = other.address;
        }
        if !other.lan_address.is_empty() {
            self.lan_address = other.lan_address;
        }
        if !other.wan_address.is_empty() {
            self.wan_address = other.wan_address;
        }
        self.lamport_timestamp = self.lamport_timestamp.max(other.lamport_timestamp);
        self.last_request = self.last_request.max(other.last_request);
        self.last_response = self.last_response.max(other.last_response);
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.mid == other.mid
    }
}

impl Eq for Peer {}

impl std::hash::Hash for Peer {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.mid.hash(state);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("mid", &self.mid)
            .field("address", &self.address)
            .field("lan", &self.lan_address)
            .field("wan", &self.wan_address)
            .field("lamport", &self.lamport_timestamp)
            .finish()
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer<{}, {}>", self.address, self.mid)
    }
}
