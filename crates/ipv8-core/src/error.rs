//! Error types for packet handling and the overlay runtime.
//!
//! [`PacketError`] covers everything that can go wrong while building or
//! reading one packet. Receive paths log and drop it; it never crosses a
//! packet-processing boundary. [`Ipv8Error`] covers lifecycle misuse of the
//! runtime.

use crate::packet::ServiceId;
use ipv8_crypto::CryptoError;
use ipv8_transport::TransportError;
use std::borrow::Cow;
use thiserror::Error;

/// Failures while serializing or decoding a single packet
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer ended before a field could be read
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length needed
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Key, signature, sealing or opening failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Encryption requested without naming a recipient
    #[error("recipient must be provided for encryption")]
    MissingRecipient,

    /// Field has a value the format does not allow
    #[error("malformed payload: {0}")]
    Malformed(Cow<'static, str>),
}

/// Runtime lifecycle errors
#[derive(Debug, Error)]
pub enum Ipv8Error {
    /// `start` called on a running instance
    #[error("IPv8 has already started")]
    AlreadyStarted,

    /// Operation needs a running instance
    #[error("IPv8 is not running")]
    NotRunning,

    /// Two overlays with the same service id
    #[error("overlay {0} already exists")]
    DuplicateOverlay(ServiceId),

    /// No overlay with this service id
    #[error("no overlay for service {0}")]
    UnknownOverlay(ServiceId),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(Cow<'static, str>),

    /// Underlying transport failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result alias for runtime operations
pub type Result<T> = std::result::Result<T, Ipv8Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_error_display() {
        let err = PacketError::TooShort {
            expected: 23,
            actual: 5,
        };
        assert_eq!(
            err.to_string(),
            "packet too short: expected at least 23 bytes, got 5"
        );
    }

    #[test]
    fn test_crypto_error_converts() {
        let err: PacketError = CryptoError::InvalidSignature.into();
        assert_eq!(err, PacketError::Crypto(CryptoError::InvalidSignature));
    }
}
