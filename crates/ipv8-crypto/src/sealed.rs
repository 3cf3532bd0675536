//! Anonymous sealed boxes for a named recipient.
//!
//! A sealed message is `ephemeral_public(32) || nonce(24) || ciphertext || tag(16)`.
//! The sender generates a fresh X25519 key per message, so only the holder of
//! the recipient's private key can open it and the sender stays anonymous.

use crate::CryptoError;
use crate::hash::seal_key;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand_core::{OsRng, RngCore};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// X25519 public key size.
pub const EPHEMERAL_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// Bytes a sealed box adds on top of the plaintext.
pub const SEAL_OVERHEAD: usize = EPHEMERAL_SIZE + NONCE_SIZE + TAG_SIZE;

/// Seal `plaintext` so only the owner of `recipient` can read it.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidPublicKey`] for a low-order recipient key and
/// [`CryptoError::EncryptionFailed`] if the AEAD rejects the input.
pub fn seal(recipient: &PublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidPublicKey);
    }

    let key = Zeroizing::new(seal_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    ));

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new((&*key).into());
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(EPHEMERAL_SIZE + NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open a box produced by [`seal`] with the recipient's secret.
///
/// # Errors
///
/// Returns [`CryptoError::DecryptionFailed`] if the box is truncated, was
/// sealed for another key, or has been tampered with.
pub fn open(secret: &StaticSecret, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < SEAL_OVERHEAD {
        return Err(CryptoError::DecryptionFailed);
    }

    let mut ephemeral_bytes = [0u8; EPHEMERAL_SIZE];
    ephemeral_bytes.copy_from_slice(&sealed[..EPHEMERAL_SIZE]);
    let ephemeral_public = PublicKey::from(ephemeral_bytes);
    let nonce = &sealed[EPHEMERAL_SIZE..EPHEMERAL_SIZE + NONCE_SIZE];
    let ciphertext = &sealed[EPHEMERAL_SIZE + NONCE_SIZE..];

    let shared = secret.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::DecryptionFailed);
    }

    let recipient = PublicKey::from(secret);
    let key = Zeroizing::new(seal_key(
        shared.as_bytes(),
        ephemeral_public.as_bytes(),
        recipient.as_bytes(),
    ));

    let cipher = XChaCha20Poly1305::new((&*key).into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: ephemeral_public.as_bytes(),
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        let sealed = seal(&public, b"for your eyes only").unwrap();
        assert_eq!(sealed.len(), 18 + SEAL_OVERHEAD);
        assert_eq!(open(&secret, &sealed).unwrap(), b"for your eyes only");
    }

    #[test]
    fn test_wrong_recipient_cannot_open() {
        let alice = StaticSecret::random_from_rng(OsRng);
        let mallory = StaticSecret::random_from_rng(OsRng);

        let sealed = seal(&PublicKey::from(&alice), b"secret").unwrap();
        assert_eq!(open(&mallory, &sealed), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_box_rejected() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let mut sealed = seal(&PublicKey::from(&secret), b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&secret, &sealed).is_err());
    }

    #[test]
    fn test_truncated_box_rejected() {
        let secret = StaticSecret::random_from_rng(OsRng);
        assert!(open(&secret, &[0u8; SEAL_OVERHEAD - 1]).is_err());
    }

    #[test]
    fn test_low_order_recipient_rejected() {
        let zero = PublicKey::from([0u8; 32]);
        assert_eq!(seal(&zero, b"x"), Err(CryptoError::InvalidPublicKey));
    }

    #[test]
    fn test_empty_plaintext() {
        let secret = StaticSecret::random_from_rng(OsRng);
        let sealed = seal(&PublicKey::from(&secret), b"").unwrap();
        assert!(open(&secret, &sealed).unwrap().is_empty());
    }
}
