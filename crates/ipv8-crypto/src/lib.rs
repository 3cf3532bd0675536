//! # IPv8 Crypto
//!
//! Key capability used by the overlay protocol.
//!
//! This crate provides:
//! - Combined X25519/Ed25519 identity keys with a stable 74-byte encoding
//! - Ed25519 packet signatures
//! - Sealed boxes (ephemeral X25519 + `XChaCha20-Poly1305`) for a named recipient
//! - SHA-1 member ids
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm |
//! |----------|-----------|
//! | Signatures | Ed25519 |
//! | Key Exchange | X25519 |
//! | AEAD | XChaCha20-Poly1305 |
//! | KDF | BLAKE3 derive-key |
//! | Member id | SHA-1 |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod hash;
pub mod keys;
pub mod sealed;

pub use error::CryptoError;
pub use hash::{MEMBER_ID_SIZE, member_id};
pub use keys::{
    Key, PUBLIC_KEY_BIN_SIZE, PrivateKey, PublicKey, SIGNATURE_SIZE, Signature,
};
