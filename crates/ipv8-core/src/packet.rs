//! Packet framing.
//!
//! ```text
//! prefix(1) | version(1) | service id(20) | message id(1)
//!   | [auth: key len(2) | key bin]          signed packets only
//!   | global time(8)
//!   | payload                               optionally sealed for a recipient
//!   | [signature(64)]                       signed packets only
//! ```
//!
//! The signature covers every byte before it.

use crate::address::Address;
use crate::error::PacketError;
use crate::payload::{
    BinMemberAuthenticationPayload, Deserializable, GlobalTimeDistributionPayload, Serializable,
};
use crate::peer::Peer;
use ipv8_crypto::{PrivateKey, PublicKey, SIGNATURE_SIZE, Signature};
use std::fmt;
use std::str::FromStr;

/// First byte of every overlay packet.
pub const PREFIX_IPV8: u8 = 0x00;

/// Protocol version byte.
pub const VERSION: u8 = 0x02;

/// Length of a service id.
pub const SERVICE_ID_SIZE: usize = 20;

/// Length of `prefix | version | service id`.
pub const PREFIX_SIZE: usize = 2 + SERVICE_ID_SIZE;

/// Length of the full header including the message id.
pub const HEADER_SIZE: usize = PREFIX_SIZE + 1;

/// Reserved message ids of the membership protocol.
pub mod message_id {
    /// Puncture request, relayed by an introducer
    pub const PUNCTURE_REQUEST: u8 = 250;
    /// Puncture, sent to open a NAT mapping
    pub const PUNCTURE: u8 = 249;
    /// Introduction request
    pub const INTRODUCTION_REQUEST: u8 = 246;
    /// Introduction response
    pub const INTRODUCTION_RESPONSE: u8 = 245;
}

/// 20-byte overlay identifier, written as 40 hex characters in configuration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId([u8; SERVICE_ID_SIZE]);

impl ServiceId {
    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; SERVICE_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse 40 hex characters.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Malformed`] for bad hex or a wrong length.
    pub fn from_hex(s: &str) -> Result<Self, PacketError> {
        let bytes = hex::decode(s).map_err(|_| PacketError::Malformed("service id is not hex".into()))?;
        let bytes: [u8; SERVICE_ID_SIZE] = bytes
            .try_into()
            .map_err(|_| PacketError::Malformed("service id must be 20 bytes".into()))?;
        Ok(Self(bytes))
    }

    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SERVICE_ID_SIZE] {
        &self.0
    }

    /// The 22-byte prefix every packet of this overlay starts with.
    #[must_use]
    pub fn prefix(&self) -> [u8; PREFIX_SIZE] {
        let mut prefix = [0u8; PREFIX_SIZE];
        prefix[0] = PREFIX_IPV8;
        prefix[1] = VERSION;
        prefix[2..].copy_from_slice(&self.0);
        prefix
    }
}

impl FromStr for ServiceId {
    type Err = PacketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({self})")
    }
}

/// A received datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Where it came from
    pub source: Address,
    /// Raw bytes, header included
    pub data: Vec<u8>,
}

/// A verified, decoded signed packet.
#[derive(Debug, Clone)]
pub struct Authenticated<T> {
    /// The signer, seen at the packet source, clock advanced to `global_time`
    pub peer: Peer,
    /// Sender's claimed global time
    pub global_time: u64,
    /// Decoded payload
    pub payload: T,
}

/// A decoded unsigned packet.
#[derive(Debug, Clone)]
pub struct Unsigned<T> {
    /// Sender's claimed global time
    pub global_time: u64,
    /// Decoded payload
    pub payload: T,
}

impl Packet {
    /// Wrap received bytes.
    #[must_use]
    pub fn new(source: Address, data: Vec<u8>) -> Self {
        Self { source, data }
    }

    /// Whether the first 22 bytes equal `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &[u8; PREFIX_SIZE]) -> bool {
        self.data.len() >= HEADER_SIZE && self.data[..PREFIX_SIZE] == prefix[..]
    }

    /// Message id byte, if the header is complete.
    #[must_use]
    pub fn message_id(&self) -> Option<u8> {
        self.data.get(PREFIX_SIZE).copied()
    }

    /// Verify the signature and decode a signed packet.
    ///
    /// # Errors
    ///
    /// Fails on truncation, an unparseable key, a bad signature, or a
    /// payload that does not decode.
    pub fn auth_payload<T: Deserializable>(&self) -> Result<Authenticated<T>, PacketError> {
        let (key, body) = self.verified_body()?;
        let (dist, used) = GlobalTimeDistributionPayload::deserialize(body)?;
        let (payload, _) = T::deserialize(&body[used..])?;
        Ok(self.authenticated(key, dist.global_time, payload))
    }

    /// Like [`Packet::auth_payload`] for a payload sealed to `recipient`.
    ///
    /// # Errors
    ///
    /// Additionally fails if the sealed payload cannot be opened.
    pub fn decrypted_auth_payload<T: Deserializable>(
        &self,
        recipient: &PrivateKey,
    ) -> Result<Authenticated<T>, PacketError> {
        let (key, body) = self.verified_body()?;
        let (dist, used) = GlobalTimeDistributionPayload::deserialize(body)?;
        let plaintext = recipient.decrypt(&body[used..])?;
        let (payload, _) = T::deserialize(&plaintext)?;
        Ok(self.authenticated(key, dist.global_time, payload))
    }

    /// Decode an unsigned packet.
    ///
    /// # Errors
    ///
    /// Fails on truncation or a payload that does not decode.
    pub fn payload<T: Deserializable>(&self) -> Result<Unsigned<T>, PacketError> {
        let body = self.body()?;
        let (dist, used) = GlobalTimeDistributionPayload::deserialize(body)?;
        let (payload, _) = T::deserialize(&body[used..])?;
        Ok(Unsigned {
            global_time: dist.global_time,
            payload,
        })
    }

    fn body(&self) -> Result<&[u8], PacketError> {
        if self.data.len() < HEADER_SIZE {
            return Err(PacketError::TooShort {
                expected: HEADER_SIZE,
                actual: self.data.len(),
            });
        }
        Ok(&self.data[HEADER_SIZE..])
    }

    /// Check the trailing signature against the embedded key and return the
    /// key plus the bytes between the auth block and the signature.
    fn verified_body(&self) -> Result<(PublicKey, &[u8]), PacketError> {
        let (auth, auth_len) = BinMemberAuthenticationPayload::deserialize(self.body()?)?;
        let key = PublicKey::from_bin(&auth.public_key_bin)?;

        let body_start = HEADER_SIZE + auth_len;
        if self.data.len() < body_start + SIGNATURE_SIZE {
            return Err(PacketError::TooShort {
                expected: body_start + SIGNATURE_SIZE,
                actual: self.data.len(),
            });
        }
        let signed_len = self.data.len() - SIGNATURE_SIZE;
        let signature = Signature::from_slice(&self.data[signed_len..])?;
        key.verify(&signature, &self.data[..signed_len])?;

        Ok((key, &self.data[body_start..signed_len]))
    }

    fn authenticated<T>(&self, key: PublicKey, global_time: u64, payload: T) -> Authenticated<T> {
        let mut peer = Peer::new(key, self.source, false);
        peer.update_clock(global_time);
        Authenticated {
            peer,
            global_time,
            payload,
        }
    }
}

/// Builds outgoing packets.
///
/// ```ignore
/// let bytes = PacketBuilder::new(prefix, message_id::PUNCTURE, global_time)
///     .sign(&my_key)
///     .build(&payload)?;
/// ```
#[must_use]
pub struct PacketBuilder<'a> {
    prefix: [u8; PREFIX_SIZE],
    message_id: u8,
    global_time: u64,
    signer: Option<&'a PrivateKey>,
    encrypt: bool,
    recipient: Option<PublicKey>,
}

impl<'a> PacketBuilder<'a> {
    /// Start an unsigned, unencrypted packet.
    pub fn new(prefix: [u8; PREFIX_SIZE], message_id: u8, global_time: u64) -> Self {
        Self {
            prefix,
            message_id,
            global_time,
            signer: None,
            encrypt: false,
            recipient: None,
        }
    }

    /// Embed the signer's public key and append a signature.
    pub fn sign(mut self, key: &'a PrivateKey) -> Self {
        self.signer = Some(key);
        self
    }

    /// Seal the payload for the recipient.
    pub fn encrypt(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Recipient for [`PacketBuilder::encrypt`].
    pub fn recipient(mut self, recipient: Option<PublicKey>) -> Self {
        self.recipient = recipient;
        self
    }

    /// Serialize `payload` into a complete packet.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::MissingRecipient`] when encryption was
    /// requested without a recipient, or a crypto error if sealing fails.
    pub fn build<P: Serializable + ?Sized>(self, payload: &P) -> Result<Vec<u8>, PacketError> {
        let recipient = match (self.encrypt, self.recipient) {
            (true, None) => return Err(PacketError::MissingRecipient),
            (true, Some(recipient)) => Some(recipient),
            (false, _) => None,
        };

        let mut packet = Vec::with_capacity(256);
        packet.extend_from_slice(&self.prefix);
        packet.push(self.message_id);

        if let Some(signer) = self.signer {
            BinMemberAuthenticationPayload {
                public_key_bin: signer.pub_key().key_to_bin().to_vec(),
            }
            .serialize_into(&mut packet);
        }

        GlobalTimeDistributionPayload {
            global_time: self.global_time,
        }
        .serialize_into(&mut packet);

        match recipient {
            Some(recipient) => packet.extend_from_slice(&recipient.encrypt(&payload.serialize())?),
            None => payload.serialize_into(&mut packet),
        }

        if let Some(signer) = self.signer {
            let signature = signer.sign(&packet);
            packet.extend_from_slice(signature.as_bytes());
        }

        Ok(packet)
    }
}
