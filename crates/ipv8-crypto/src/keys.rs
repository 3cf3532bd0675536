//! Overlay identity keys.
//!
//! A key pair bundles an X25519 key (for sealed boxes) with an Ed25519 key
//! (for signatures). Serialized public keys are
//! `"LibNaCLPK:" || x25519_public(32) || ed25519_public(32)` (74 bytes);
//! private keys use the `"LibNaCLSK:"` marker followed by both 32-byte
//! secrets. The SHA-1 of the serialized public key is the member id.

use crate::CryptoError;
use crate::hash::{MEMBER_ID_SIZE, member_id};
use crate::sealed;
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, RngCore};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Marker that starts every serialized public key.
pub const PUBLIC_KEY_PREFIX: &[u8; 10] = b"LibNaCLPK:";

/// Marker that starts every serialized private key.
pub const PRIVATE_KEY_PREFIX: &[u8; 10] = b"LibNaCLSK:";

/// Length of a serialized public key.
pub const PUBLIC_KEY_BIN_SIZE: usize = PUBLIC_KEY_PREFIX.len() + 32 + 32;

/// Length of a serialized private key.
pub const PRIVATE_KEY_BIN_SIZE: usize = PRIVATE_KEY_PREFIX.len() + 32 + 32;

/// Length of a signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Wrap raw signature bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; SIGNATURE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Read a signature from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the slice is not exactly 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_SIZE] =
            slice.try_into().map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    /// Raw signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

/// Public half of an overlay identity.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    agreement: x25519_dalek::PublicKey,
    verifying: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Parse a serialized public key.
    ///
    /// # Errors
    ///
    /// Fails on a wrong length, a missing `LibNaCLPK:` marker, or an
    /// Ed25519 half that is not a valid curve point.
    pub fn from_bin(bin: &[u8]) -> Result<Self, CryptoError> {
        if bin.len() != PUBLIC_KEY_BIN_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_BIN_SIZE,
                actual: bin.len(),
            });
        }
        let (prefix, rest) = bin.split_at(PUBLIC_KEY_PREFIX.len());
        if prefix != PUBLIC_KEY_PREFIX {
            return Err(CryptoError::InvalidKeyPrefix);
        }

        let mut agreement = [0u8; 32];
        agreement.copy_from_slice(&rest[..32]);
        let mut verifying = [0u8; 32];
        verifying.copy_from_slice(&rest[32..]);

        Ok(Self {
            agreement: x25519_dalek::PublicKey::from(agreement),
            verifying: ed25519_dalek::VerifyingKey::from_bytes(&verifying)
                .map_err(|_| CryptoError::InvalidPublicKey)?,
        })
    }

    /// Serialize as `LibNaCLPK:` + X25519 + Ed25519 public bytes.
    #[must_use]
    pub fn key_to_bin(&self) -> [u8; PUBLIC_KEY_BIN_SIZE] {
        let mut out = [0u8; PUBLIC_KEY_BIN_SIZE];
        out[..10].copy_from_slice(PUBLIC_KEY_PREFIX);
        out[10..42].copy_from_slice(self.agreement.as_bytes());
        out[42..].copy_from_slice(self.verifying.as_bytes());
        out
    }

    /// SHA-1 of the serialized key, the member id.
    #[must_use]
    pub fn key_to_hash(&self) -> [u8; MEMBER_ID_SIZE] {
        member_id(&self.key_to_bin())
    }

    /// Check `signature` over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if it does not authenticate the message.
    pub fn verify(&self, signature: &Signature, message: &[u8]) -> Result<(), CryptoError> {
        let signature = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.verifying
            .verify(message, &signature)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Seal `plaintext` for the owner of this key.
    ///
    /// # Errors
    ///
    /// See [`sealed::seal`].
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        sealed::seal(&self.agreement, plaintext)
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key_to_bin().hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.key_to_hash()))
    }
}

/// Private half of an overlay identity. Secrets are zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey {
    agreement: x25519_dalek::StaticSecret,
    signing: ed25519_dalek::SigningKey,
}

impl PrivateKey {
    /// Generate a fresh identity.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            agreement: x25519_dalek::StaticSecret::random_from_rng(&mut *rng),
            signing: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Parse a serialized private key.
    ///
    /// # Errors
    ///
    /// Fails on a wrong length or a missing `LibNaCLSK:` marker.
    pub fn from_bin(bin: &[u8]) -> Result<Self, CryptoError> {
        if bin.len() != PRIVATE_KEY_BIN_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: PRIVATE_KEY_BIN_SIZE,
                actual: bin.len(),
            });
        }
        let (prefix, rest) = bin.split_at(PRIVATE_KEY_PREFIX.len());
        if prefix != PRIVATE_KEY_PREFIX {
            return Err(CryptoError::InvalidKeyPrefix);
        }

        let mut agreement = Zeroizing::new([0u8; 32]);
        agreement.copy_from_slice(&rest[..32]);
        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&rest[32..]);

        Ok(Self {
            agreement: x25519_dalek::StaticSecret::from(*agreement),
            signing: ed25519_dalek::SigningKey::from_bytes(&seed),
        })
    }

    /// Serialize both secrets behind the `LibNaCLSK:` marker.
    ///
    /// # Security
    ///
    /// The returned buffer holds raw key material and is wiped on drop.
    #[must_use]
    pub fn key_to_bin(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(PRIVATE_KEY_BIN_SIZE));
        out.extend_from_slice(PRIVATE_KEY_PREFIX);
        out.extend_from_slice(self.agreement.as_bytes());
        out.extend_from_slice(self.signing.as_bytes());
        out
    }

    /// The matching public key.
    #[must_use]
    pub fn pub_key(&self) -> PublicKey {
        PublicKey {
            agreement: x25519_dalek::PublicKey::from(&self.agreement),
            verifying: self.signing.verifying_key(),
        }
    }

    /// Deterministic Ed25519 signature over `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing.sign(message).to_bytes())
    }

    /// Open a box sealed for [`Self::pub_key`].
    ///
    /// # Errors
    ///
    /// See [`sealed::open`].
    pub fn decrypt(&self, sealed_box: &[u8]) -> Result<Vec<u8>, CryptoError> {
        sealed::open(&self.agreement, sealed_box)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", hex::encode(self.pub_key().key_to_hash()))
    }
}

/// A key capability: remote peers carry only the public half, the local
/// node also holds the private half.
#[derive(Clone, Debug)]
pub enum Key {
    /// Verify and encrypt only
    Public(PublicKey),
    /// Additionally sign and decrypt
    Private(Arc<PrivateKey>),
}

impl Key {
    /// Public half of the capability.
    #[must_use]
    pub fn pub_key(&self) -> PublicKey {
        match self {
            Self::Public(key) => *key,
            Self::Private(key) => key.pub_key(),
        }
    }

    /// The private half, if this is the local identity.
    #[must_use]
    pub fn private(&self) -> Option<&PrivateKey> {
        match self {
            Self::Public(_) => None,
            Self::Private(key) => Some(key),
        }
    }

    /// Serialized public key.
    #[must_use]
    pub fn key_to_bin(&self) -> [u8; PUBLIC_KEY_BIN_SIZE] {
        self.pub_key().key_to_bin()
    }

    /// Member id of the public key.
    #[must_use]
    pub fn key_to_hash(&self) -> [u8; MEMBER_ID_SIZE] {
        self.pub_key().key_to_hash()
    }
}

impl From<PublicKey> for Key {
    fn from(key: PublicKey) -> Self {
        Self::Public(key)
    }
}

impl From<PrivateKey> for Key {
    fn from(key: PrivateKey) -> Self {
        Self::Private(Arc::new(key))
    }
}

impl From<Arc<PrivateKey>> for Key {
    fn from(key: Arc<PrivateKey>) -> Self {
        Self::Private(key)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.pub_key() == other.pub_key()
    }
}

impl Eq for Key {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand_core::OsRng;

    #[test]
    fn test_public_key_bin_layout() {
        let key = PrivateKey::generate(&mut OsRng);
        let bin = key.pub_key().key_to_bin();

        assert_eq!(bin.len(), 74);
        assert_eq!(&bin[..10], b"LibNaCLPK:");
        assert_eq!(PublicKey::from_bin(&bin).unwrap(), key.pub_key());
    }

    #[test]
    fn test_private_key_restores_identity() {
        let key = PrivateKey::generate(&mut OsRng);
        let restored = PrivateKey::from_bin(&key.key_to_bin()).unwrap();

        assert_eq!(restored.pub_key(), key.pub_key());
        assert_eq!(restored.sign(b"hello"), key.sign(b"hello"));
    }

    #[test]
    fn test_from_bin_rejects_bad_input() {
        let key = PrivateKey::generate(&mut OsRng);
        let mut bin = key.pub_key().key_to_bin();

        assert_eq!(
            PublicKey::from_bin(&bin[..73]),
            Err(CryptoError::InvalidKeyLength {
                expected: 74,
                actual: 73
            })
        );

        bin[0] = b'X';
        assert_eq!(PublicKey::from_bin(&bin), Err(CryptoError::InvalidKeyPrefix));
        assert_eq!(
            PrivateKey::from_bin(&key.pub_key().key_to_bin()).unwrap_err(),
            CryptoError::InvalidKeyPrefix
        );
    }

    #[test]
    fn test_sign_verify() {
        let key = PrivateKey::generate(&mut OsRng);
        let signature = key.sign(b"payload");

        assert!(key.pub_key().verify(&signature, b"payload").is_ok());
        assert_eq!(
            key.pub_key().verify(&signature, b"tampered"),
            Err(CryptoError::InvalidSignature)
        );

        let other = PrivateKey::generate(&mut OsRng);
        assert!(other.pub_key().verify(&signature, b"payload").is_err());
    }

    #[test]
    fn test_encrypt_for_recipient() {
        let recipient = PrivateKey::generate(&mut OsRng);
        let sealed = recipient.pub_key().encrypt(b"hi there").unwrap();

        assert_eq!(recipient.decrypt(&sealed).unwrap(), b"hi there");
        assert!(PrivateKey::generate(&mut OsRng).decrypt(&sealed).is_err());
    }

    #[test]
    fn test_member_id_is_stable() {
        let key = PrivateKey::generate(&mut OsRng);
        let public = Key::from(key.pub_key());
        let private = Key::from(key);

        assert_eq!(public.key_to_hash(), private.key_to_hash());
        assert_eq!(public, private);
        assert!(public.private().is_none());
        assert!(private.private().is_some());
    }

    #[test]
    fn test_signature_from_slice() {
        assert!(Signature::from_slice(&[0u8; 63]).is_err());
        assert!(Signature::from_slice(&[0u8; 64]).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Flipping any single bit of a signed message invalidates it.
        #[test]
        fn prop_bit_flip_breaks_signature(
            message in prop::collection::vec(any::<u8>(), 1..256),
            bit in any::<usize>(),
        ) {
            let key = PrivateKey::generate(&mut OsRng);
            let signature = key.sign(&message);
            prop_assert!(key.pub_key().verify(&signature, &message).is_ok());

            let bit = bit % (message.len() * 8);
            let mut tampered = message.clone();
            tampered[bit / 8] ^= 1 << (bit % 8);
            prop_assert_eq!(
                key.pub_key().verify(&signature, &tampered),
                Err(CryptoError::InvalidSignature)
            );
        }

        /// A sealed message opens for its recipient only, and not after
        /// any byte of the box changed.
        #[test]
        fn prop_sealed_message_opens_only_intact(
            message in prop::collection::vec(any::<u8>(), 0..256),
            index in any::<usize>(),
            flip in 1u8..=255,
        ) {
            let recipient = PrivateKey::generate(&mut OsRng);
            let sealed = recipient.pub_key().encrypt(&message).unwrap();
            prop_assert_eq!(recipient.decrypt(&sealed).unwrap(), message);
            prop_assert!(PrivateKey::generate(&mut OsRng).decrypt(&sealed).is_err());

            let mut tampered = sealed.clone();
            let index = index % tampered.len();
            tampered[index] ^= flip;
            prop_assert!(recipient.decrypt(&tampered).is_err());
        }
    }
}
