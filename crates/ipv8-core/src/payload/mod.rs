//! Wire payload codecs.
//!
//! Payloads are flat concatenations of fixed-width big-endian fields, with an
//! optional trailing `extra_bytes` blob that extensions can piggyback on.

mod auth;
mod introduction;
mod puncture;

pub use auth::{BinMemberAuthenticationPayload, GlobalTimeDistributionPayload};
pub use introduction::{IntroductionRequestPayload, IntroductionResponsePayload};
pub use puncture::{PuncturePayload, PunctureRequestPayload};

use crate::address::{ADDRESS_SIZE, Address};
use crate::error::PacketError;

/// Something that can be written into a packet body.
pub trait Serializable {
    /// Append the encoded form to `out`.
    fn serialize_into(&self, out: &mut Vec<u8>);

    /// Encode into a fresh buffer.
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }
}

/// Something that can be read back from a packet body.
pub trait Deserializable: Sized {
    /// Decode from the start of `buf`, returning the value and the number of
    /// bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError`] if `buf` is truncated or malformed.
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError>;
}

/// NAT behaviour a node reports about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    /// Not enough evidence
    #[default]
    Unknown,
    /// Not behind a NAT
    Public,
    /// Endpoint-dependent mapping
    SymmetricNat,
}

const ADVICE_BIT: u8 = 0x01;
const TUNNEL_BIT: u8 = 0x02;
const CONNECTION_TYPE_MASK: u8 = 0xC0;
const CONNECTION_PUBLIC: u8 = 0x80;
const CONNECTION_SYMMETRIC: u8 = 0xC0;

/// Flags carried in the single connection byte of introduction messages.
///
/// Layout: bit 0 advice, bit 1 tunnel, bits 6-7 connection type
/// (`00` unknown, `10` public, `11` symmetric NAT; `01` reads as unknown).
/// Other bits are zero on write and ignored on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionByte {
    /// NAT classification of the sender
    pub connection_type: ConnectionType,
    /// Sender asks to be introduced to someone
    pub advice: bool,
    /// Reserved for tunnelled traffic, always false in this core
    pub tunnel: bool,
}

impl ConnectionByte {
    /// Pack into one byte.
    #[must_use]
    pub fn encode(&self) -> u8 {
        let mut byte = match self.connection_type {
            ConnectionType::Unknown => 0,
            ConnectionType::Public => CONNECTION_PUBLIC,
            ConnectionType::SymmetricNat => CONNECTION_SYMMETRIC,
        };
        if self.advice {
            byte |= ADVICE_BIT;
        }
        if self.tunnel {
            byte |= TUNNEL_BIT;
        }
        byte
    }

    /// Unpack from one byte.
    #[must_use]
    pub fn decode(byte: u8) -> Self {
        let connection_type = match byte & CONNECTION_TYPE_MASK {
            CONNECTION_PUBLIC => ConnectionType::Public,
            CONNECTION_SYMMETRIC => ConnectionType::SymmetricNat,
            _ => ConnectionType::Unknown,
        };
        Self {
            connection_type,
            advice: byte & ADVICE_BIT != 0,
            tunnel: byte & TUNNEL_BIT != 0,
        }
    }
}

/// Bounds-checked cursor over a payload buffer.
pub(crate) struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        let end = self.pos + len;
        if end > self.buf.len() {
            return Err(PacketError::TooShort {
                expected: end,
                actual: self.buf.len(),
            });
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, PacketError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, PacketError> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(bytes))
    }

    pub(crate) fn address(&mut self) -> Result<Address, PacketError> {
        Address::from_bytes(self.take(ADDRESS_SIZE)?)
    }

    /// Everything left, consuming it.
    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_connection_byte_layout() {
        let byte = ConnectionByte {
            connection_type: ConnectionType::SymmetricNat,
            advice: true,
            tunnel: false,
        };
        assert_eq!(byte.encode(), 0xC1);

        let public = ConnectionByte {
            connection_type: ConnectionType::Public,
            advice: false,
            tunnel: true,
        };
        assert_eq!(public.encode(), 0x82);
        assert_eq!(ConnectionByte::default().encode(), 0x00);
    }

    #[test]
    fn test_connection_byte_decode_tolerates_reserved_bits() {
        let decoded = ConnectionByte::decode(0x40 | 0x3C | ADVICE_BIT);
        assert_eq!(decoded.connection_type, ConnectionType::Unknown);
        assert!(decoded.advice);
        assert!(!decoded.tunnel);
    }

    #[test]
    fn test_reader_reports_needed_length() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(reader.u16().unwrap(), 0x0102);
        assert_eq!(
            reader.u16(),
            Err(PacketError::TooShort {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(reader.rest(), &[3]);
        assert_eq!(reader.position(), 3);
    }

    proptest! {
        /// Bits outside the advice, tunnel and type fields are ignored, and
        /// re-encoding a decoded byte keeps every defined field.
        #[test]
        fn prop_connection_byte_ignores_undefined_bits(byte in any::<u8>()) {
            let decoded = ConnectionByte::decode(byte);
            let encoded = decoded.encode();

            prop_assert_eq!(encoded & 0x3C, 0);
            prop_assert_eq!(encoded & (ADVICE_BIT | TUNNEL_BIT), byte & (ADVICE_BIT | TUNNEL_BIT));
            prop_assert_eq!(ConnectionByte::decode(encoded), decoded);
            prop_assert_eq!(ConnectionByte::decode(byte & !0x3C), decoded);
        }
    }
}
