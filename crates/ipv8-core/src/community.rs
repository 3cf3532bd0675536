//! Overlay protocol engine.
//!
//! A [`Community`] is one overlay: it owns a service id, frames and signs
//! packets for it, dispatches inbound packets by message id, and runs the
//! four-message NAT traversal exchange:
//!
//! ```text
//!  A (walker)               B (introducer)              C (candidate)
//!     | -- IntroductionRequest --> |                          |
//!     |                            | -- PunctureRequest(A) -> |
//!     | <- IntroductionResponse(C) |                          |
//!     | <------------------------- Puncture ----------------- |
//! ```
//!
//! After the exchange A knows C's addresses and C has opened a NAT mapping
//! towards A, so A's next walk to C gets through.
//!
//! Nothing here blocks or returns receive-path errors: sends are handed to
//! an [`Endpoint`] and every inbound failure is logged and dropped.

use crate::address::Address;
use crate::config::CommunitySettings;
use crate::endpoint::Endpoint;
use crate::error::PacketError;
use crate::network::{Network, WanLogItem};
use crate::packet::{Authenticated, PREFIX_SIZE, Packet, PacketBuilder, ServiceId, message_id};
use crate::payload::{
    Deserializable, IntroductionRequestPayload, IntroductionResponsePayload, PuncturePayload,
    PunctureRequestPayload, Serializable,
};
use crate::peer::Peer;
use ipv8_crypto::PrivateKey;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Instant, SystemTime};

/// Handler for one message id.
///
/// Errors are logged by the dispatcher; they never reach the receive loop.
pub type MessageHandler =
    Arc<dyn Fn(&Community, &Packet) -> Result<(), PacketError> + Send + Sync>;

const RESERVED_MESSAGE_IDS: [u8; 4] = [
    message_id::PUNCTURE_REQUEST,
    message_id::PUNCTURE,
    message_id::INTRODUCTION_REQUEST,
    message_id::INTRODUCTION_RESPONSE,
];

/// Assembles a [`Community`] and freezes its dispatch table.
pub struct CommunityBuilder {
    settings: CommunitySettings,
    key: Arc<PrivateKey>,
    network: Arc<Network>,
    endpoint: Arc<dyn Endpoint>,
    handlers: HashMap<u8, MessageHandler>,
}

impl CommunityBuilder {
    /// Start building an overlay signing with `key`.
    #[must_use]
    pub fn new(
        settings: CommunitySettings,
        key: Arc<PrivateKey>,
        network: Arc<Network>,
        endpoint: Arc<dyn Endpoint>,
    ) -> Self {
        Self {
            settings,
            key,
            network,
            endpoint,
            handlers: HashMap::new(),
        }
    }

    /// Register an application handler.
    ///
    /// The membership protocol ids are reserved; handlers for them are
    /// ignored.
    #[must_use]
    pub fn handler<F>(self, message_id: u8, handler: F) -> Self
    where
        F: Fn(&Community, &Packet) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        self.shared_handler(message_id, Arc::new(handler))
    }

    /// Register an already shared handler.
    #[must_use]
    pub fn shared_handler(mut self, message_id: u8, handler: MessageHandler) -> Self {
        if RESERVED_MESSAGE_IDS.contains(&message_id) {
            tracing::warn!("Ignoring handler for reserved message id {}", message_id);
        } else {
            self.handlers.insert(message_id, handler);
        }
        self
    }

    /// Finish the overlay.
    #[must_use]
    pub fn build(self) -> Community {
        let mut handlers = self.handlers;
        handlers.insert(
            message_id::PUNCTURE_REQUEST,
            Arc::new(Community::handle_puncture_request),
        );
        handlers.insert(message_id::PUNCTURE, Arc::new(Community::handle_puncture));
        handlers.insert(
            message_id::INTRODUCTION_REQUEST,
            Arc::new(Community::handle_introduction_request),
        );
        handlers.insert(
            message_id::INTRODUCTION_RESPONSE,
            Arc::new(Community::handle_introduction_response),
        );

        let my_peer = Peer::new(Arc::clone(&self.key), Address::EMPTY, false);

        Community {
            prefix: self.settings.service_id.prefix(),
            settings: self.settings,
            key: self.key,
            my_peer,
            network: self.network,
            endpoint: self.endpoint,
            handlers,
            global_time: AtomicU64::new(0),
            my_estimated_lan: Mutex::new(Address::EMPTY),
            last_bootstrap: Mutex::new(None),
        }
    }
}

/// One overlay instance.
pub struct Community {
    settings: CommunitySettings,
    prefix: [u8; PREFIX_SIZE],
    key: Arc<PrivateKey>,
    my_peer: Peer,
    network: Arc<Network>,
    endpoint: Arc<dyn Endpoint>,
    handlers: HashMap<u8, MessageHandler>,
    global_time: AtomicU64,
    my_estimated_lan: Mutex<Address>,
    last_bootstrap: Mutex<Option<Instant>>,
}

impl fmt::Debug for Community {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Community")
            .field("service_id", &self.settings.service_id)
            .field("my_peer", &self.my_peer.mid())
            .field("global_time", &self.global_time())
            .finish_non_exhaustive()
    }
}

impl Community {
    // ---- accessors ----

    /// Overlay id.
    #[must_use]
    pub fn service_id(&self) -> ServiceId {
        self.settings.service_id
    }

    /// Header prefix of this overlay's packets.
    #[must_use]
    pub fn prefix(&self) -> &[u8; PREFIX_SIZE] {
        &self.prefix
    }

    /// Overlay settings.
    #[must_use]
    pub fn settings(&self) -> &CommunitySettings {
        &self.settings
    }

    /// The local node.
    #[must_use]
    pub fn my_peer(&self) -> &Peer {
        &self.my_peer
    }

    /// Shared peer registry.
    #[must_use]
    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    /// Outbound endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Arc<dyn Endpoint> {
        &self.endpoint
    }

    /// Last claimed global time.
    #[must_use]
    pub fn global_time(&self) -> u64 {
        self.global_time.load(Ordering::SeqCst)
    }

    /// Increment the Lamport clock and return the new value.
    pub fn claim_global_time(&self) -> u64 {
        self.global_time.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Our LAN address as last estimated.
    #[must_use]
    pub fn my_estimated_lan(&self) -> Address {
        *self
            .my_estimated_lan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Our WAN address by majority of peer reports, or empty.
    #[must_use]
    pub fn my_estimated_wan(&self) -> Address {
        self.network.wan_log().estimate_wan().unwrap_or(Address::EMPTY)
    }

    /// Adopt a new LAN estimate. WAN reports made against the old one are
    /// discarded.
    pub fn on_estimated_lan_changed(&self, address: Address) {
        let mut lan = self
            .my_estimated_lan
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *lan != address {
            tracing::debug!("Estimated LAN changed: {} -> {}", *lan, address);
            *lan = address;
            self.network.wan_log().clear();
        }
    }

    /// Verified peers of this overlay.
    #[must_use]
    pub fn get_peers(&self) -> Vec<Peer> {
        self.network.get_peers_for_service(&self.settings.service_id)
    }

    /// Addresses worth walking to in this overlay.
    #[must_use]
    pub fn get_walkable_addresses(&self) -> Vec<Address> {
        self.network
            .get_walkable_addresses(Some(&self.settings.service_id))
    }

    /// A random overlay peer other than `exclude`.
    #[must_use]
    pub fn get_peer_for_introduction(&self, exclude: Option<&Peer>) -> Option<Peer> {
        let available: Vec<Peer> = self
            .get_peers()
            .into_iter()
            .filter(|peer| exclude.is_none_or(|excluded| excluded.mid() != peer.mid()))
            .collect();
        available.choose(&mut rand::thread_rng()).cloned()
    }

    // ---- lifecycle ----

    /// Keep our own identity and the bootstrap nodes out of the registry.
    pub fn load(&self) {
        tracing::info!(
            "Loading overlay {} for peer {}",
            self.settings.service_id,
            self.my_peer.mid()
        );
        self.network.add_blacklisted_mid(self.my_peer.mid());
        for address in &self.settings.bootstrap_addresses {
            self.network.add_blacklisted_address(*address);
        }
    }

    /// Counterpart of [`Community::load`].
    pub fn unload(&self) {
        tracing::info!("Unloading overlay {}", self.settings.service_id);
    }

    // ---- walking ----

    /// Send an introduction request to every bootstrap node, at most once
    /// per bootstrap interval.
    pub fn bootstrap(&self) {
        if !self.endpoint.is_open() {
            return;
        }
        {
            let mut last = self
                .last_bootstrap
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if last.is_some_and(|at| at.elapsed() < self.settings.bootstrap_interval) {
                return;
            }
            *last = Some(Instant::now());
        }

        tracing::debug!(
            "Bootstrapping overlay {} via {} nodes",
            self.settings.service_id,
            self.settings.bootstrap_addresses.len()
        );
        for address in &self.settings.bootstrap_addresses {
            self.walk_to(*address);
        }
    }

    /// Send an introduction request to `address`.
    pub fn walk_to(&self, address: Address) {
        match self.create_introduction_request(address, &[]) {
            Ok(packet) => self.send_to_address(address, packet),
            Err(e) => tracing::warn!("Failed to build introduction request: {}", e),
        }
    }

    /// Ask `from_peer`, or a random peer, for an introduction.
    ///
    /// Without a peer to ask, bootstrap instead. With probability
    /// `reset_chance` a bootstrap node is asked even when peers are known,
    /// which heals partitioned overlays.
    pub fn get_new_introduction(&self, from_peer: Option<&Peer>) {
        let address = match from_peer {
            Some(peer) => peer.address(),
            None => {
                let available = self.get_peers();
                let mut rng = rand::thread_rng();
                let bootstrap = &self.settings.bootstrap_addresses;
                if available.is_empty() {
                    self.bootstrap();
                    return;
                }
                let reset = !bootstrap.is_empty()
                    && self.endpoint.is_open()
                    && rng.r#gen::<f64>() < self.settings.reset_chance;
                let picked = if reset {
                    bootstrap.choose(&mut rng).copied()
                } else {
                    available.choose(&mut rng).map(Peer::address)
                };
                match picked {
                    Some(address) => address,
                    None => return,
                }
            }
        };
        self.walk_to(address);
    }

    // ---- packet construction ----

    /// Frame `payload` under this overlay's prefix, claiming a new global
    /// time. Signed packets carry our key and a signature.
    ///
    /// # Errors
    ///
    /// Propagates [`PacketBuilder::build`] failures.
    pub fn serialize_packet<P: Serializable + ?Sized>(
        &self,
        message_id: u8,
        payload: &P,
        sign: bool,
    ) -> Result<Vec<u8>, PacketError> {
        let builder = PacketBuilder::new(self.prefix, message_id, self.claim_global_time());
        let builder = if sign { builder.sign(&self.key) } else { builder };
        builder.build(payload)
    }

    /// Like [`Community::serialize_packet`], signed, with the payload sealed
    /// for `recipient`.
    ///
    /// # Errors
    ///
    /// Propagates [`PacketBuilder::build`] failures.
    pub fn serialize_encrypted<P: Serializable + ?Sized>(
        &self,
        message_id: u8,
        payload: &P,
        recipient: &Peer,
    ) -> Result<Vec<u8>, PacketError> {
        PacketBuilder::new(self.prefix, message_id, self.claim_global_time())
            .sign(&self.key)
            .encrypt(true)
            .recipient(Some(recipient.public_key()))
            .build(payload)
    }

    /// Signed introduction request to `address`.
    ///
    /// # Errors
    ///
    /// Propagates framing failures.
    pub fn create_introduction_request(
        &self,
        address: Address,
        extra_bytes: &[u8],
    ) -> Result<Vec<u8>, PacketError> {
        let global_time = self.claim_global_time();
        let payload = IntroductionRequestPayload {
            destination_address: address,
            source_lan_address: self.my_estimated_lan(),
            source_wan_address: self.my_estimated_wan(),
            advice: true,
            connection_type: self.network.wan_log().estimate_connection_type(),
            identifier: identifier(global_time),
            extra_bytes: extra_bytes.to_vec(),
        };
        tracing::debug!("-> {:?}", payload);

        PacketBuilder::new(self.prefix, message_id::INTRODUCTION_REQUEST, global_time)
            .sign(&self.key)
            .build(&payload)
    }

    /// Signed introduction response to `requester`, naming `introduction`.
    ///
    /// # Errors
    ///
    /// Propagates framing failures.
    pub fn create_introduction_response(
        &self,
        requester: &Peer,
        identifier: u16,
        introduction: Option<&Peer>,
    ) -> Result<Vec<u8>, PacketError> {
        let payload = IntroductionResponsePayload {
            destination_address: requester.address(),
            source_lan_address: self.my_estimated_lan(),
            source_wan_address: self.my_estimated_wan(),
            lan_introduction_address: introduction.map_or(Address::EMPTY, Peer::lan_address),
            wan_introduction_address: introduction.map_or(Address::EMPTY, Peer::wan_address),
            connection_type: self.network.wan_log().estimate_connection_type(),
            tunnel: false,
            identifier,
            extra_bytes: Vec::new(),
        };
        tracing::debug!("-> {:?}", payload);

        self.serialize_packet(message_id::INTRODUCTION_RESPONSE, &payload, true)
    }

    /// Signed puncture carrying our own addresses.
    ///
    /// # Errors
    ///
    /// Propagates framing failures.
    pub fn create_puncture(
        &self,
        lan_walker: Address,
        wan_walker: Address,
        identifier: u16,
    ) -> Result<Vec<u8>, PacketError> {
        let payload = PuncturePayload {
            source_lan_address: lan_walker,
            source_wan_address: wan_walker,
            identifier,
        };
        tracing::debug!("-> {:?}", payload);

        self.serialize_packet(message_id::PUNCTURE, &payload, true)
    }

    /// Unsigned puncture request naming the walker's addresses.
    ///
    /// # Errors
    ///
    /// Propagates framing failures.
    pub fn create_puncture_request(
        &self,
        lan_walker: Address,
        wan_walker: Address,
        identifier: u16,
    ) -> Result<Vec<u8>, PacketError> {
        let payload = PunctureRequestPayload {
            lan_walker_address: lan_walker,
            wan_walker_address: wan_walker,
            identifier,
        };
        tracing::debug!("-> {:?}", payload);

        self.serialize_packet(message_id::PUNCTURE_REQUEST, &payload, false)
    }

    // ---- sending ----

    /// Send to an address, noting the request on the peer verified there.
    pub fn send_to_address(&self, address: Address, data: Vec<u8>) {
        self.network.touch_last_request(address);
        self.endpoint.send(address, data);
    }

    /// Send to a peer at its registry address, falling back to the address
    /// on the given record.
    pub fn send_to_peer(&self, peer: &Peer, data: Vec<u8>) {
        let address = self
            .network
            .get_verified_by_mid(&peer.mid())
            .map_or(peer.address(), |verified| verified.address());
        self.send_to_address(address, data);
    }

    // ---- receiving ----

    /// Dispatch one datagram.
    ///
    /// Packets of other overlays are ignored silently. Unknown message ids
    /// and handler failures are logged.
    pub fn on_packet(&self, packet: &Packet) {
        if !packet.has_prefix(&self.prefix) {
            return;
        }
        self.network.touch_last_response(packet.source);

        let Some(message_id) = packet.message_id() else {
            return;
        };
        match self.handlers.get(&message_id) {
            Some(handler) => {
                if let Err(e) = handler(self, packet) {
                    tracing::warn!(
                        "Dropping message {} from {}: {}",
                        message_id,
                        packet.source,
                        e
                    );
                }
            }
            None => {
                tracing::debug!(
                    "Received unknown message {} from {}",
                    message_id,
                    packet.source
                );
            }
        }
    }

    /// Verify and decode a signed packet, advancing the sender's Lamport
    /// clock in the registry.
    ///
    /// Handlers decode signed messages through this, not
    /// [`Packet::auth_payload`], for the registry clock to follow them.
    ///
    /// # Errors
    ///
    /// Same as [`Packet::auth_payload`].
    pub fn auth_payload<T: Deserializable>(
        &self,
        packet: &Packet,
    ) -> Result<Authenticated<T>, PacketError> {
        let auth = packet.auth_payload::<T>()?;
        self.network.update_clock(&auth.peer.mid(), auth.global_time);
        Ok(auth)
    }

    /// Like [`Community::auth_payload`] for a payload sealed to this node.
    ///
    /// # Errors
    ///
    /// Same as [`Packet::decrypted_auth_payload`].
    pub fn decrypted_auth_payload<T: Deserializable>(
        &self,
        packet: &Packet,
    ) -> Result<Authenticated<T>, PacketError> {
        let auth = packet.decrypted_auth_payload::<T>(&self.key)?;
        self.network.update_clock(&auth.peer.mid(), auth.global_time);
        Ok(auth)
    }

    fn handle_introduction_request(&self, packet: &Packet) -> Result<(), PacketError> {
        let auth = self.auth_payload::<IntroductionRequestPayload>(packet)?;
        self.on_introduction_request(auth.peer, auth.payload);
        Ok(())
    }

    fn handle_introduction_response(&self, packet: &Packet) -> Result<(), PacketError> {
        let auth = self.auth_payload::<IntroductionResponsePayload>(packet)?;
        self.on_introduction_response(auth.peer, auth.payload);
        Ok(())
    }

    fn handle_puncture_request(&self, packet: &Packet) -> Result<(), PacketError> {
        let unsigned = packet.payload::<PunctureRequestPayload>()?;
        self.on_puncture_request(packet.source, unsigned.payload);
        Ok(())
    }

    fn handle_puncture(&self, packet: &Packet) -> Result<(), PacketError> {
        let auth = self.auth_payload::<PuncturePayload>(packet)?;
        self.on_puncture(auth.peer, auth.payload);
        Ok(())
    }

    /// Verify the requester, answer it, and ask a random peer to punch a
    /// hole towards it.
    pub fn on_introduction_request(&self, peer: Peer, payload: IntroductionRequestPayload) {
        tracing::debug!("<- {:?}", payload);

        if self
            .settings
            .max_peers
            .is_some_and(|max| self.get_peers().len() >= max)
        {
            tracing::info!("Dropping introduction request from {}, too many peers", peer);
            return;
        }

        let requester =
            peer.with_reported_addresses(payload.source_lan_address, payload.source_wan_address);
        self.add_verified_peer(requester.clone());

        let introduction = self.get_peer_for_introduction(Some(&requester));
        if let Some(candidate) = &introduction {
            match self.create_puncture_request(
                requester.lan_address(),
                requester.wan_address(),
                payload.identifier,
            ) {
                Ok(packet) => self.send_to_peer(candidate, packet),
                Err(e) => tracing::warn!("Failed to build puncture request: {}", e),
            }
        }

        match self.create_introduction_response(
            &requester,
            payload.identifier,
            introduction.as_ref(),
        ) {
            Ok(packet) => self.send_to_peer(&requester, packet),
            Err(e) => tracing::warn!("Failed to build introduction response: {}", e),
        }
    }

    /// Verify the responder, learn our WAN from it, and record the
    /// introduced peer's addresses as walkable.
    pub fn on_introduction_response(&self, peer: Peer, payload: IntroductionResponsePayload) {
        tracing::debug!("<- {:?}", payload);

        self.add_estimated_wan(&peer, payload.destination_address);

        let responder =
            peer.with_reported_addresses(payload.source_lan_address, payload.source_wan_address);
        self.add_verified_peer(responder.clone());

        let lan = payload.lan_introduction_address;
        let wan = payload.wan_introduction_address;
        let my_wan = self.my_estimated_wan();

        if !wan.is_empty() && wan.ip() != my_wan.ip() {
            // Remote peer. The LAN is tried too in case it happens to be ours.
            if !lan.is_empty() {
                self.discover_address(&responder, lan);
            }
            self.discover_address(&responder, wan);
        } else if !lan.is_empty() && wan.ip() == my_wan.ip() {
            // Behind the same NAT
            self.discover_address(&responder, lan);
        } else if !wan.is_empty() {
            // Same public IP but no LAN reported. Try the WAN, which needs
            // hairpinning, and guess the peer runs on our host with an
            // unchanged port.
            self.discover_address(&responder, wan);
            self.discover_address(
                &responder,
                Address::new(self.my_estimated_lan().ip(), wan.port()),
            );
        }
    }

    /// Punch a hole towards the walker named by an introducer.
    pub fn on_puncture_request(&self, source: Address, payload: PunctureRequestPayload) {
        tracing::debug!("<- {:?} from {}", payload, source);

        let my_wan = self.my_estimated_wan();
        let target = if payload.wan_walker_address.ip() == my_wan.ip() {
            payload.lan_walker_address
        } else {
            payload.wan_walker_address
        };

        match self.create_puncture(self.my_estimated_lan(), my_wan, payload.identifier) {
            Ok(packet) => self.send_to_address(target, packet),
            Err(e) => tracing::warn!("Failed to build puncture: {}", e),
        }
    }

    /// Punctures only exist to open NAT mappings.
    pub fn on_puncture(&self, peer: Peer, payload: PuncturePayload) {
        tracing::debug!("<- {:?} from {}", payload, peer);
    }

    // ---- registry helpers ----

    fn add_verified_peer(&self, peer: Peer) {
        let mid = peer.mid();
        self.network.add_verified_peer(peer);
        self.network
            .discover_services(mid, [self.settings.service_id]);
    }

    fn discover_address(&self, peer: &Peer, address: Address) {
        if address.is_empty()
            || address == self.my_estimated_lan()
            || address == self.my_estimated_wan()
        {
            return;
        }
        self.network
            .discover_address(peer, address, Some(self.settings.service_id));
    }

    /// Peers outside our LAN report the address our packets came from,
    /// which is our WAN.
    fn add_estimated_wan(&self, peer: &Peer, wan: Address) {
        let sender = peer.address();
        if sender.is_lan() || sender.is_loopback() || sender.is_empty() {
            return;
        }
        self.network.wan_log().add_item(WanLogItem {
            timestamp: SystemTime::now(),
            sender,
            lan: self.my_estimated_lan(),
            wan,
        });
    }
}

/// 16-bit request identifier derived from a global time.
fn identifier(global_time: u64) -> u16 {
    (global_time % u64::from(u16::MAX)) as u16
}
