//! Fuzz target for key and identifier parsing
//!
//! Public keys arrive inside every signed packet, service ids come from
//! configuration files.

#![no_main]

use ipv8_core::ServiceId;
use ipv8_crypto::PublicKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(key) = PublicKey::from_bin(data) {
        // A key that parses must serialize back to the same bytes
        assert_eq!(&key.key_to_bin()[..], data);
    }

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(service) = s.parse::<ServiceId>() {
            assert_eq!(service.to_string(), s.to_lowercase());
        }
    }
});
