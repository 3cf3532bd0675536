//! Cryptographic error types.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Serialized key has the wrong length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Serialized key does not start with the expected type marker
    #[error("invalid key prefix")]
    InvalidKeyPrefix,

    /// Bytes are not a valid public key point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Signature is malformed or does not authenticate the message
    #[error("invalid signature")]
    InvalidSignature,

    /// Sealing a message for a recipient failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Opening a sealed message failed (truncated, tampered or wrong key)
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,
}
