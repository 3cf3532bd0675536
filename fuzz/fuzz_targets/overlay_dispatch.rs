//! Fuzz target for overlay packet dispatch
//!
//! Feeds datagrams with a valid header and arbitrary bodies into a loaded
//! overlay. Handlers may reject anything but must not panic, and the registry
//! must stay usable afterwards.

#![no_main]

use arbitrary::Arbitrary;
use ipv8_core::{
    Address, CommunityBuilder, CommunitySettings, Endpoint, Network, Packet, ServiceId,
    message_id,
};
use ipv8_crypto::PrivateKey;
use libfuzzer_sys::fuzz_target;
use rand_core::OsRng;
use std::net::Ipv4Addr;
use std::sync::Arc;

struct Discard;

impl Endpoint for Discard {
    fn send(&self, _address: Address, _data: Vec<u8>) {}

    fn is_open(&self) -> bool {
        true
    }
}

#[derive(Debug, Arbitrary)]
enum Kind {
    IntroductionRequest,
    IntroductionResponse,
    PunctureRequest,
    Puncture,
    Other(u8),
}

#[derive(Debug, Arbitrary)]
struct Datagram {
    source: ([u8; 4], u16),
    kind: Kind,
    body: Vec<u8>,
}

const SERVICE: ServiceId = ServiceId::from_bytes([0x7e; 20]);

fuzz_target!(|datagrams: Vec<Datagram>| {
    let community = CommunityBuilder::new(
        CommunitySettings::new(SERVICE),
        Arc::new(PrivateKey::generate(&mut OsRng)),
        Arc::new(Network::new()),
        Arc::new(Discard),
    )
    .build();
    community.load();

    for datagram in datagrams {
        let id = match datagram.kind {
            Kind::IntroductionRequest => message_id::INTRODUCTION_REQUEST,
            Kind::IntroductionResponse => message_id::INTRODUCTION_RESPONSE,
            Kind::PunctureRequest => message_id::PUNCTURE_REQUEST,
            Kind::Puncture => message_id::PUNCTURE,
            Kind::Other(id) => id,
        };
        let mut data = SERVICE.prefix().to_vec();
        data.push(id);
        data.extend_from_slice(&datagram.body);

        let (ip, port) = datagram.source;
        let source = Address::new(Ipv4Addr::from(ip), port);
        community.on_packet(&Packet::new(source, data));
    }

    let _ = community.get_walkable_addresses();
    let _ = community.get_peers();
});
