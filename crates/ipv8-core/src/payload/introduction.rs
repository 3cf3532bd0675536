use super::{ConnectionByte, ConnectionType, Deserializable, Reader, Serializable};
use crate::address::Address;
use crate::error::PacketError;

/// Ask the receiver to verify us and introduce us to someone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroductionRequestPayload {
    /// The receiver's address as the sender sees it
    pub destination_address: Address,
    /// Sender's LAN address
    pub source_lan_address: Address,
    /// Sender's WAN address
    pub source_wan_address: Address,
    /// Sender wants an introduction
    pub advice: bool,
    /// Sender's NAT classification
    pub connection_type: ConnectionType,
    /// Echoed in the response and the puncture request
    pub identifier: u16,
    /// Extension data
    pub extra_bytes: Vec<u8>,
}

impl Serializable for IntroductionRequestPayload {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.destination_address.to_bytes());
        out.extend_from_slice(&self.source_lan_address.to_bytes());
        out.extend_from_slice(&self.source_wan_address.to_bytes());
        out.push(
            ConnectionByte {
                connection_type: self.connection_type,
                advice: self.advice,
                tunnel: false,
            }
            .encode(),
        );
        out.extend_from_slice(&self.identifier.to_be_bytes());
        out.extend_from_slice(&self.extra_bytes);
    }
}

impl Deserializable for IntroductionRequestPayload {
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let mut reader = Reader::new(buf);
        let destination_address = reader.address()?;
        let source_lan_address = reader.address()?;
        let source_wan_address = reader.address()?;
        let flags = ConnectionByte::decode(reader.u8()?);
        let identifier = reader.u16()?;
        let extra_bytes = reader.rest().to_vec();

        Ok((
            Self {
                destination_address,
                source_lan_address,
                source_wan_address,
                advice: flags.advice,
                connection_type: flags.connection_type,
                identifier,
                extra_bytes,
            },
            reader.position(),
        ))
    }
}

/// Answer to an introduction request, naming an introduced peer if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntroductionResponsePayload {
    /// The requester's address as the responder sees it
    pub destination_address: Address,
    /// Responder's LAN address
    pub source_lan_address: Address,
    /// Responder's WAN address
    pub source_wan_address: Address,
    /// Introduced peer's LAN address, or empty
    pub lan_introduction_address: Address,
    /// Introduced peer's WAN address, or empty
    pub wan_introduction_address: Address,
    /// Responder's NAT classification
    pub connection_type: ConnectionType,
    /// Reserved, always false
    pub tunnel: bool,
    /// Copied from the request
    pub identifier: u16,
    /// Extension data
    pub extra_bytes: Vec<u8>,
}

impl Serializable for IntroductionResponsePayload {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.destination_address.to_bytes());
        out.extend_from_slice(&self.source_lan_address.to_bytes());
        out.extend_from_slice(&self.source_wan_address.to_bytes());
        out.extend_from_slice(&self.lan_introduction_address.to_bytes());
        out.extend_from_slice(&self.wan_introduction_address.to_bytes());
        out.push(
            ConnectionByte {
                connection_type: self.connection_type,
                advice: false,
                tunnel: self.tunnel,
            }
            .encode(),
        );
        out.extend_from_slice(&self.identifier.to_be_bytes());
        out.extend_from_slice(&self.extra_bytes);
    }
}

impl Deserializable for IntroductionResponsePayload {
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let mut reader = Reader::new(buf);
        let destination_address = reader.address()?;
        let source_lan_address = reader.address()?;
        let source_wan_address = reader.address()?;
        let lan_introduction_address = reader.address()?;
        let wan_introduction_address = reader.address()?;
        let flags = ConnectionByte::decode(reader.u8()?);
        let identifier = reader.u16()?;
        let extra_bytes = reader.rest().to_vec();

        Ok((
            Self {
                destination_address,
                source_lan_address,
                source_wan_address,
                lan_introduction_address,
                wan_introduction_address,
                connection_type: flags.connection_type,
                tunnel: flags.tunnel,
                identifier,
                extra_bytes,
            },
            reader.position(),
        ))
    }
}
