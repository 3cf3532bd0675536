//! Benchmarks for packet framing and the registry.
//!
//! Run with: `cargo bench -p ipv8-core`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ipv8_core::payload::{IntroductionRequestPayload, IntroductionResponsePayload};
use ipv8_core::{Address, ConnectionType, Network, Packet, PacketBuilder, Peer, ServiceId, message_id};
use ipv8_crypto::PrivateKey;
use rand_core::OsRng;

const SERVICE: &str = "7e313685c1912a141279f8248fc8db5899c5df5a";

fn request() -> IntroductionRequestPayload {
    IntroductionRequestPayload {
        destination_address: "2.2.2.2:1".parse().unwrap(),
        source_lan_address: "10.0.0.1:1".parse().unwrap(),
        source_wan_address: "1.1.1.1:1".parse().unwrap(),
        advice: true,
        connection_type: ConnectionType::Unknown,
        identifier: 1,
        extra_bytes: Vec::new(),
    }
}

fn bench_build(c: &mut Criterion) {
    let key = PrivateKey::generate(&mut OsRng);
    let prefix = SERVICE.parse::<ServiceId>().unwrap().prefix();
    let payload = request();

    c.bench_function("build_signed_introduction_request", |b| {
        b.iter(|| {
            PacketBuilder::new(prefix, message_id::INTRODUCTION_REQUEST, 1)
                .sign(&key)
                .build(black_box(&payload))
        })
    });
    c.bench_function("build_unsigned_introduction_request", |b| {
        b.iter(|| {
            PacketBuilder::new(prefix, message_id::INTRODUCTION_REQUEST, 1)
                .build(black_box(&payload))
        })
    });
}

fn bench_verify(c: &mut Criterion) {
    let key = PrivateKey::generate(&mut OsRng);
    let prefix = SERVICE.parse::<ServiceId>().unwrap().prefix();
    let data = PacketBuilder::new(prefix, message_id::INTRODUCTION_REQUEST, 1)
        .sign(&key)
        .build(&request())
        .unwrap();
    let packet = Packet::new("1.1.1.1:1".parse().unwrap(), data);

    c.bench_function("verify_introduction_request", |b| {
        b.iter(|| black_box(&packet).auth_payload::<IntroductionRequestPayload>())
    });
    c.bench_function("reject_wrong_payload_type", |b| {
        b.iter(|| black_box(&packet).auth_payload::<IntroductionResponsePayload>())
    });
}

fn bench_walkable(c: &mut Criterion) {
    let mut group = c.benchmark_group("walkable_addresses");
    let service = SERVICE.parse::<ServiceId>().unwrap();

    for peers in [10u8, 100] {
        let network = Network::new();
        for i in 0..peers {
            let peer = Peer::new(
                PrivateKey::generate(&mut OsRng).pub_key(),
                Address::new([1, 1, 1, i].into(), 1),
                false,
            );
            network.discover_address(&peer, Address::new([2, 2, 2, i].into(), 1), Some(service));
            network.discover_services(peer.mid(), [service]);
        }

        group.bench_with_input(BenchmarkId::from_parameter(peers), &peers, |b, _| {
            b.iter(|| network.get_walkable_addresses(black_box(Some(&service))))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_build, bench_verify, bench_walkable);
criterion_main!(benches);
