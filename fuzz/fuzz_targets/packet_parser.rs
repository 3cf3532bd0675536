//! Fuzz target for packet and payload decoding
//!
//! Every decoder must return Ok or Err on arbitrary input, never panic.

#![no_main]

use ipv8_core::payload::{
    BinMemberAuthenticationPayload, GlobalTimeDistributionPayload, IntroductionRequestPayload,
    IntroductionResponsePayload, PuncturePayload, PunctureRequestPayload,
};
use ipv8_core::{Address, Deserializable, Packet};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = Address::from_bytes(data);
    let _ = BinMemberAuthenticationPayload::deserialize(data);
    let _ = GlobalTimeDistributionPayload::deserialize(data);
    let _ = IntroductionRequestPayload::deserialize(data);
    let _ = IntroductionResponsePayload::deserialize(data);
    let _ = PunctureRequestPayload::deserialize(data);
    let _ = PuncturePayload::deserialize(data);

    let packet = Packet::new(Address::EMPTY, data.to_vec());
    let _ = packet.message_id();
    let _ = packet.auth_payload::<IntroductionRequestPayload>();
    let _ = packet.auth_payload::<IntroductionResponsePayload>();
    let _ = packet.auth_payload::<PuncturePayload>();
    let _ = packet.payload::<PunctureRequestPayload>();
});
