//! Property-based tests for the IPv8 overlay
//!
//! Uses proptest to check registry and estimation invariants over random
//! operation sequences, and that decoders survive arbitrary input.

use ipv8_core::payload::{
    IntroductionRequestPayload, IntroductionResponsePayload, PuncturePayload,
    PunctureRequestPayload,
};
use ipv8_core::{Address, Deserializable, Network, Packet, Peer, Serializable, ServiceId};
use ipv8_crypto::{PrivateKey, PublicKey};
use proptest::prelude::*;
use rand_core::OsRng;
use std::collections::HashSet;
use std::net::Ipv4Addr;

fn keys(count: usize) -> Vec<PublicKey> {
    (0..count)
        .map(|_| PrivateKey::generate(&mut OsRng).pub_key())
        .collect()
}

fn address_strategy() -> impl Strategy<Value = Address> {
    (any::<[u8; 4]>(), 1u16..=u16::MAX)
        .prop_map(|(ip, port)| Address::new(Ipv4Addr::from(ip), port))
}

// ============================================================================
// Registry Properties
// ============================================================================

mod registry_properties {
    use super::*;

    const KEYS: usize = 4;
    const ADDRESSES: usize = 8;

    /// Introducers and clocks use key `k` at address `k`. Verification
    /// may put any key at any address, so keys move and share addresses.
    #[derive(Debug, Clone)]
    enum Op {
        Verify { key: usize, address: usize },
        Discover { introducer: usize, address: usize },
        Remove(usize),
        Clock { key: usize, time: u64 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..KEYS, 0..ADDRESSES).prop_map(|(key, address)| Op::Verify { key, address }),
            (0..KEYS, 0..ADDRESSES)
                .prop_map(|(introducer, address)| Op::Discover { introducer, address }),
            (0..ADDRESSES).prop_map(Op::Remove),
            (0..KEYS, any::<u64>()).prop_map(|(key, time)| Op::Clock { key, time }),
        ]
    }

    fn pool() -> Vec<Address> {
        (1..=ADDRESSES as u8)
            .map(|i| Address::new(Ipv4Addr::new(1, 1, 1, i), u16::from(i)))
            .collect()
    }

    fn apply(network: &Network, keys: &[PublicKey], addresses: &[Address], op: &Op) {
        let peer = |k: usize| Peer::new(keys[k].clone(), addresses[k], false);
        match *op {
            Op::Verify { key, address } => network.add_verified_peer(Peer::new(
                keys[key].clone(),
                addresses[address],
                false,
            )),
            Op::Discover {
                introducer,
                address,
            } => network.discover_address(&peer(introducer), addresses[address], None),
            Op::Remove(a) => network.remove_by_address(addresses[a]),
            Op::Clock { key, time } => {
                network.update_clock(&peer(key).mid(), time);
            }
        }
    }

    proptest! {
        /// Verified peers are findable by their address, their address is
        /// known, and it is never offered as walkable. Holds when several
        /// keys share one address and it gets removed.
        #[test]
        fn registry_stays_consistent(
            ops in prop::collection::vec(op_strategy(), 0..40),
        ) {
            let keys = keys(KEYS);
            let addresses = pool();
            let network = Network::new();

            for op in &ops {
                apply(&network, &keys, &addresses, op);
            }

            let known: HashSet<Address> = network.known_addresses().into_iter().collect();
            let walkable: HashSet<Address> =
                network.get_walkable_addresses(None).into_iter().collect();

            for peer in network.verified_peers() {
                prop_assert!(peer.is_connected());
                prop_assert!(known.contains(&peer.address()));
                prop_assert!(!walkable.contains(&peer.address()));
                let found = network.get_verified_by_address(peer.address());
                prop_assert_eq!(found.map(|p| p.address()), Some(peer.address()));
                prop_assert_eq!(
                    network.get_verified_by_mid(&peer.mid()).map(|p| p.address()),
                    Some(peer.address())
                );
            }
            prop_assert!(walkable.is_subset(&known));
        }

        /// Blacklisted addresses never enter the registry.
        #[test]
        fn blacklist_excludes(
            ops in prop::collection::vec(op_strategy(), 0..40),
            blacklisted in prop::collection::hash_set(0..ADDRESSES, 0..ADDRESSES),
        ) {
            let keys = keys(KEYS);
            let addresses = pool();
            let network = Network::new();
            for a in &blacklisted {
                network.add_blacklisted_address(addresses[*a]);
            }

            for op in &ops {
                apply(&network, &keys, &addresses, op);
            }

            let banned: HashSet<Address> = blacklisted.iter().map(|a| addresses[*a]).collect();
            prop_assert!(network.known_addresses().iter().all(|a| !banned.contains(a)));
            prop_assert!(network
                .verified_peers()
                .iter()
                .all(|peer| !banned.contains(&peer.address())));
        }

        /// Re-adding a peer never winds its clock back.
        #[test]
        fn merge_keeps_highest_clock(times in prop::collection::vec(any::<u64>(), 1..20)) {
            let key = PrivateKey::generate(&mut OsRng).pub_key();
            let network = Network::new();
            let address: Address = "1.2.3.4:5".parse().unwrap();

            for time in &times {
                let mut peer = Peer::new(key.clone(), address, false);
                peer.update_clock(*time);
                network.add_verified_peer(peer);
            }

            let stored = network.get_verified_by_address(address).unwrap();
            prop_assert_eq!(stored.lamport_timestamp(), *times.iter().max().unwrap());
        }

        /// Merging observations of one member never clears an address
        /// field: each field holds the latest non-empty value reported.
        #[test]
        fn merge_never_clears_address_fields(
            updates in prop::collection::vec(
                (
                    prop::option::of(0..ADDRESSES),
                    prop::option::of(0..ADDRESSES),
                    prop::option::of(0..ADDRESSES),
                ),
                1..20,
            ),
        ) {
            let key = PrivateKey::generate(&mut OsRng).pub_key();
            let addresses = pool();
            let pick = |slot: Option<usize>| slot.map_or(Address::EMPTY, |i| addresses[i]);
            let network = Network::new();
            let mid = Peer::new(key.clone(), Address::EMPTY, true).mid();

            let (mut address, mut lan, mut wan) = (Address::EMPTY, Address::EMPTY, Address::EMPTY);
            for (a, l, w) in &updates {
                let update = Peer::new(key.clone(), pick(*a), false)
                    .with_reported_addresses(pick(*l), pick(*w));
                network.add_verified_peer(update);

                for (field, slot) in [(&mut address, a), (&mut lan, l), (&mut wan, w)] {
                    if slot.is_some() {
                        *field = pick(*slot);
                    }
                }
                let stored = network.get_verified_by_mid(&mid).unwrap();
                prop_assert_eq!(stored.address(), address);
                prop_assert_eq!(stored.lan_address(), lan);
                prop_assert_eq!(stored.wan_address(), wan);
            }
            prop_assert_eq!(network.len(), 1);
        }

        /// Discovering the same address twice changes nothing.
        #[test]
        fn discovery_is_idempotent(address in address_strategy(), service in any::<[u8; 20]>()) {
            let introducer = Peer::new(
                PrivateKey::generate(&mut OsRng).pub_key(),
                "9.9.9.9:9".parse().unwrap(),
                false,
            );
            let service = ServiceId::from_bytes(service);
            let network = Network::new();

            network.discover_address(&introducer, address, Some(service));
            let mut first = network.known_addresses();
            let first_walkable = network.get_walkable_addresses(Some(&service));
            let first_intro = network.introduction_of(address);

            network.discover_address(&introducer, address, Some(service));
            let mut second = network.known_addresses();
            first.sort();
            second.sort();

            prop_assert_eq!(first, second);
            prop_assert_eq!(first_walkable, network.get_walkable_addresses(Some(&service)));
            prop_assert_eq!(first_intro, network.introduction_of(address));
            prop_assert_eq!(network.len(), 1);
        }
    }
}

// ============================================================================
// WAN Estimation Properties
// ============================================================================

mod wan_properties {
    use super::*;
    use ipv8_core::{MAJORITY_INPUT_SIZE, WanLogItem};
    use std::time::SystemTime;

    fn wan(i: u8) -> Address {
        Address::new(Ipv4Addr::new(2, 2, 2, i), 1)
    }

    proptest! {
        /// The estimate is the most frequent WAN among the most recent
        /// reports, and a strict majority always wins.
        #[test]
        fn estimate_follows_recent_majority(
            reports in prop::collection::vec((0u8..6, 0u8..3), 1..30),
        ) {
            let network = Network::new();
            let log = network.wan_log();
            for (sender, reported) in &reports {
                log.add_item(WanLogItem {
                    timestamp: SystemTime::now(),
                    sender: Address::new(Ipv4Addr::new(3, 3, 3, *sender), 1),
                    lan: "10.0.0.1:1".parse().unwrap(),
                    wan: wan(*reported),
                });
            }

            let entries = log.get_log();
            let window: Vec<Address> = entries
                .iter()
                .rev()
                .take(MAJORITY_INPUT_SIZE)
                .map(|item| item.wan)
                .collect();
            let count = |a: &Address| window.iter().filter(|w| *w == a).count();

            let estimate = log.estimate_wan().unwrap();
            let best = window.iter().map(count).max().unwrap();
            prop_assert_eq!(count(&estimate), best);
            if best * 2 > window.len() {
                prop_assert!(window.iter().filter(|w| count(w) == best).all(|w| *w == estimate));
            }

            // one entry per (sender, wan) pair
            let pairs: HashSet<(Address, Address)> =
                entries.iter().map(|item| (item.sender, item.wan)).collect();
            prop_assert_eq!(pairs.len(), entries.len());
        }
    }
}

// ============================================================================
// Decoder Robustness Properties
// ============================================================================

mod decoder_properties {
    use super::*;
    use ipv8_core::{HEADER_SIZE, PREFIX_SIZE};

    proptest! {
        /// Payload decoders reject or accept arbitrary bytes without panicking.
        #[test]
        fn payload_decoders_never_panic(data in prop::collection::vec(any::<u8>(), 0..256)) {
            let _ = IntroductionRequestPayload::deserialize(&data);
            let _ = IntroductionResponsePayload::deserialize(&data);
            let _ = PunctureRequestPayload::deserialize(&data);
            let _ = PuncturePayload::deserialize(&data);
            let _ = Address::from_bytes(&data);
        }

        /// Packet parsing never panics, whatever follows the header.
        #[test]
        fn packet_parsing_never_panics(
            service in any::<[u8; 20]>(),
            message_id in any::<u8>(),
            body in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let mut data = ServiceId::from_bytes(service).prefix().to_vec();
            prop_assert_eq!(data.len(), PREFIX_SIZE);
            data.push(message_id);
            data.extend_from_slice(&body);
            prop_assert!(data.len() >= HEADER_SIZE);

            let packet = Packet::new("1.2.3.4:5".parse().unwrap(), data);
            prop_assert_eq!(packet.message_id(), Some(message_id));
            let _ = packet.auth_payload::<IntroductionRequestPayload>();
            let _ = packet.auth_payload::<PuncturePayload>();
            let _ = packet.payload::<PunctureRequestPayload>();
        }

        /// Truncated introduction requests are rejected.
        #[test]
        fn truncated_request_rejected(cut in 0usize..19) {
            let payload = IntroductionRequestPayload {
                destination_address: "1.1.1.1:1".parse().unwrap(),
                source_lan_address: "10.0.0.1:2".parse().unwrap(),
                source_wan_address: "2.2.2.2:3".parse().unwrap(),
                advice: true,
                connection_type: Default::default(),
                identifier: 7,
                extra_bytes: Vec::new(),
            };
            let encoded = payload.serialize();
            prop_assert!(cut < encoded.len());
            prop_assert!(IntroductionRequestPayload::deserialize(&encoded[..cut]).is_err());
        }
    }
}
