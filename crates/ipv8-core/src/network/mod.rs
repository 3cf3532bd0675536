//! The peer registry.
//!
//! [`Network`] is the single source of truth for every address we have heard
//! of, the peers we verified, the services they advertise and the blacklists.
//! All state lives behind one mutex; every operation takes it once, works on
//! a consistent view and returns owned snapshots, never references into the
//! maps.
//!
//! One `Network` is shared by all overlays of a node.

mod wan_log;

pub use wan_log::{MAJORITY_INPUT_SIZE, WanEstimationLog, WanLogItem};

use crate::address::Address;
use crate::packet::ServiceId;
use crate::peer::{MemberId, Peer};
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Who told us about an address, and through which service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Introduction {
    /// Introducing peer, `None` if the address is known from direct contact
    pub introducer: Option<MemberId>,
    /// Service the introduction happened in
    pub service_id: Option<ServiceId>,
}

#[derive(Default)]
struct State {
    all_addresses: HashMap<Address, Introduction>,
    verified_peers: HashMap<MemberId, Peer>,
    services_per_peer: HashMap<MemberId, HashSet<ServiceId>>,
    blacklist: HashSet<Address>,
    blacklist_mids: HashSet<MemberId>,
}

impl State {
    fn add_verified_peer(&mut self, peer: Peer) {
        let mid = peer.mid();
        if self.blacklist_mids.contains(&mid) {
            return;
        }

        if self.verified_peers.contains_key(&mid) {
            let mut peer = peer;
            if self.blacklist.contains(&peer.address()) {
                peer.set_address(Address::EMPTY);
            }
            self.remember_address(peer.address());
            if let Some(known) = self.verified_peers.get_mut(&mid) {
                known.merge(&peer);
            }
            return;
        }

        let address = peer.address();
        if self.all_addresses.contains_key(&address) || address.is_empty() {
            self.verified_peers.insert(mid, peer);
        } else if !self.blacklist.contains(&address) {
            self.remember_address(address);
            self.verified_peers.insert(mid, peer);
        }
    }

    /// Record a directly observed address unless it is already known.
    fn remember_address(&mut self, address: Address) {
        if address.is_empty() || self.blacklist.contains(&address) {
            return;
        }
        self.all_addresses.entry(address).or_insert(Introduction {
            introducer: None,
            service_id: None,
        });
    }

    fn find_by_address(&self, address: Address) -> Option<&Peer> {
        self.verified_peers
            .values()
            .find(|peer| peer.address() == address)
    }

    fn find_by_address_mut(&mut self, address: Address) -> Option<&mut Peer> {
        self.verified_peers
            .values_mut()
            .find(|peer| peer.address() == address)
    }

    fn address_in_use(&self, address: Address) -> bool {
        self.find_by_address(address).is_some()
    }

    fn peers_for_service(&self, service_id: &ServiceId) -> impl Iterator<Item = &Peer> {
        self.verified_peers.values().filter(move |peer| {
            self.services_per_peer
                .get(&peer.mid())
                .is_some_and(|services| services.contains(service_id))
        })
    }
}

/// Registry of known addresses and verified peers.
#[derive(Default)]
pub struct Network {
    state: Mutex<State>,
    wan_log: WanEstimationLog,
}

impl Network {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reports of our own WAN address.
    #[must_use]
    pub fn wan_log(&self) -> &WanEstimationLog {
        &self.wan_log
    }

    /// `peer` introduced `address` to us.
    ///
    /// A blacklisted address is dropped. Otherwise it is recorded with
    /// `peer` as introducer, if it is new or its previous introducer is no
    /// longer verified. Either way `peer` itself is then verified.
    pub fn discover_address(&self, peer: &Peer, address: Address, service_id: Option<ServiceId>) {
        let mut state = self.state();

        if !state.blacklist.contains(&address) && !address.is_empty() {
            let replace = match state.all_addresses.get(&address) {
                None => true,
                Some(existing) => existing
                    .introducer
                    .is_none_or(|mid| !state.verified_peers.contains_key(&mid)),
            };
            if replace {
                state.all_addresses.insert(
                    address,
                    Introduction {
                        introducer: Some(peer.mid()),
                        service_id,
                    },
                );
            }
        }

        state.add_verified_peer(peer.clone());
    }

    /// Verify `peer`, or merge it into the known record with the same member id.
    ///
    /// Merging keeps identity: non-empty address fields overwrite, empty
    /// ones never clear, the Lamport clock takes the maximum.
    pub fn add_verified_peer(&self, peer: Peer) {
        self.state().add_verified_peer(peer);
    }

    /// Add `service_ids` to the services `mid` advertises.
    pub fn discover_services(&self, mid: MemberId, service_ids: impl IntoIterator<Item = ServiceId>) {
        self.state()
            .services_per_peer
            .entry(mid)
            .or_default()
            .extend(service_ids);
    }

    /// Verified peers advertising `service_id`.
    #[must_use]
    pub fn get_peers_for_service(&self, service_id: &ServiceId) -> Vec<Peer> {
        self.state().peers_for_service(service_id).cloned().collect()
    }

    /// Services a member advertises.
    #[must_use]
    pub fn get_services_for_peer(&self, mid: &MemberId) -> HashSet<ServiceId> {
        self.state()
            .services_per_peer
            .get(mid)
            .cloned()
            .unwrap_or_default()
    }

    /// Known addresses that no verified peer occupies yet.
    ///
    /// With a service id, only peers of that service count as occupying,
    /// and an address is kept only if its introducer runs the service or it
    /// was introduced through it. This is a heuristic: services tend to
    /// spread along introduction chains.
    #[must_use]
    pub fn get_walkable_addresses(&self, service_id: Option<&ServiceId>) -> Vec<Address> {
        let state = self.state();

        let occupied: HashSet<Address> = match service_id {
            Some(service_id) => state
                .peers_for_service(service_id)
                .map(Peer::address)
                .collect(),
            None => state.verified_peers.values().map(Peer::address).collect(),
        };

        state
            .all_addresses
            .iter()
            .filter(|(address, _)| !occupied.contains(address))
            .filter(|(_, intro)| match service_id {
                None => true,
                Some(service_id) => {
                    intro.service_id.as_ref() == Some(service_id)
                        || intro.introducer.is_some_and(|mid| {
                            state
                                .services_per_peer
                                .get(&mid)
                                .is_some_and(|services| services.contains(service_id))
                        })
                }
            })
            .map(|(address, _)| *address)
            .collect()
    }

    /// A verified peer using `address`. Arbitrary pick if several do.
    #[must_use]
    pub fn get_verified_by_address(&self, address: Address) -> Option<Peer> {
        self.state().find_by_address(address).cloned()
    }

    /// The verified peer with this serialized public key.
    #[must_use]
    pub fn get_verified_by_public_key_bin(&self, public_key_bin: &[u8]) -> Option<Peer> {
        self.state()
            .verified_peers
            .values()
            .find(|peer| peer.public_key().key_to_bin()[..] == *public_key_bin)
            .cloned()
    }

    /// The verified peer with this member id.
    #[must_use]
    pub fn get_verified_by_mid(&self, mid: &MemberId) -> Option<Peer> {
        self.state().verified_peers.get(mid).cloned()
    }

    /// Addresses `mid` introduced to us.
    #[must_use]
    pub fn get_introduction_from(&self, mid: &MemberId) -> Vec<Address> {
        self.state()
            .all_addresses
            .iter()
            .filter(|(_, intro)| intro.introducer.as_ref() == Some(mid))
            .map(|(address, _)| *address)
            .collect()
    }

    /// Forget `address`. Every verified peer using it loses its address and
    /// is evicted once it has no address left.
    pub fn remove_by_address(&self, address: Address) {
        let mut state = self.state();
        state.all_addresses.remove(&address);
        if address.is_empty() {
            return;
        }

        let mut evicted = Vec::new();
        for peer in state.verified_peers.values_mut() {
            if peer.address() == address {
                peer.set_address(Address::EMPTY);
                if !peer.is_connected() {
                    evicted.push(peer.mid());
                }
            }
        }
        for mid in evicted {
            state.verified_peers.remove(&mid);
        }
    }

    /// Unlink a verified peer along with its services. Its address is
    /// forgotten unless another verified peer still uses it.
    pub fn remove_peer(&self, mid: &MemberId) {
        let mut state = self.state();
        if let Some(peer) = state.verified_peers.remove(mid) {
            if !state.address_in_use(peer.address()) {
                state.all_addresses.remove(&peer.address());
            }
        }
        state.services_per_peer.remove(mid);
    }

    /// Any verified peer.
    #[must_use]
    pub fn get_random_peer(&self) -> Option<Peer> {
        self.state()
            .verified_peers
            .values()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Up to `max` distinct verified peers in random order.
    #[must_use]
    pub fn get_random_peers(&self, max: usize) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.state().verified_peers.values().cloned().collect();
        peers.shuffle(&mut rand::thread_rng());
        peers.truncate(max);
        peers
    }

    /// Snapshot of all verified peers.
    #[must_use]
    pub fn verified_peers(&self) -> Vec<Peer> {
        self.state().verified_peers.values().cloned().collect()
    }

    /// Snapshot of every known address.
    #[must_use]
    pub fn known_addresses(&self) -> Vec<Address> {
        self.state().all_addresses.keys().copied().collect()
    }

    /// Who introduced `address`, if it is known.
    #[must_use]
    pub fn introduction_of(&self, address: Address) -> Option<Introduction> {
        self.state().all_addresses.get(&address).copied()
    }

    /// Number of verified peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().verified_peers.len()
    }

    /// Whether no peer is verified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().verified_peers.is_empty()
    }

    /// Never record `address` as walkable or as a peer address.
    pub fn add_blacklisted_address(&self, address: Address) {
        self.state().blacklist.insert(address);
    }

    /// Never verify this member.
    pub fn add_blacklisted_mid(&self, mid: MemberId) {
        self.state().blacklist_mids.insert(mid);
    }

    /// Whether `address` is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, address: Address) -> bool {
        self.state().blacklist.contains(&address)
    }

    /// Mark the peer at `address` as just heard from. Returns whether one exists.
    pub fn touch_last_response(&self, address: Address) -> bool {
        match self.state().find_by_address_mut(address) {
            Some(peer) => {
                peer.touch_last_response();
                true
            }
            None => false,
        }
    }

    /// Mark the peer at `address` as just sent to. Returns whether one exists.
    pub fn touch_last_request(&self, address: Address) -> bool {
        match self.state().find_by_address_mut(address) {
            Some(peer) => {
                peer.touch_last_request();
                true
            }
            None => false,
        }
    }

    /// Advance the Lamport clock of a verified peer.
    pub fn update_clock(&self, mid: &MemberId, global_time: u64) {
        if let Some(peer) = self.state().verified_peers.get_mut(mid) {
            peer.update_clock(global_time);
        }
    }
}
