use super::{Deserializable, Reader, Serializable};
use crate::address::Address;
use crate::error::PacketError;

/// Ask the receiver to punch a hole towards the named walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunctureRequestPayload {
    /// Walker's LAN address
    pub lan_walker_address: Address,
    /// Walker's WAN address
    pub wan_walker_address: Address,
    /// Identifier of the originating introduction request
    pub identifier: u16,
}

/// Hole-punching packet; carries no actionable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuncturePayload {
    /// Sender's LAN address
    pub source_lan_address: Address,
    /// Sender's WAN address
    pub source_wan_address: Address,
    /// Identifier of the originating introduction request
    pub identifier: u16,
}

fn write(out: &mut Vec<u8>, lan: Address, wan: Address, identifier: u16) {
    out.extend_from_slice(&lan.to_bytes());
    out.extend_from_slice(&wan.to_bytes());
    out.extend_from_slice(&identifier.to_be_bytes());
}

fn read(buf: &[u8]) -> Result<(Address, Address, u16, usize), PacketError> {
    let mut reader = Reader::new(buf);
    let lan = reader.address()?;
    let wan = reader.address()?;
    let identifier = reader.u16()?;
    Ok((lan, wan, identifier, reader.position()))
}

impl Serializable for PunctureRequestPayload {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        write(out, self.lan_walker_address, self.wan_walker_address, self.identifier);
    }
}

impl Deserializable for PunctureRequestPayload {
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let (lan_walker_address, wan_walker_address, identifier, used) = read(buf)?;
        Ok((
            Self {
                lan_walker_address,
                wan_walker_address,
                identifier,
            },
            used,
        ))
    }
}

impl Serializable for PuncturePayload {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        write(out, self.source_lan_address, self.source_wan_address, self.identifier);
    }
}

impl Deserializable for PuncturePayload {
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let (source_lan_address, source_wan_address, identifier, used) = read(buf)?;
        Ok((
            Self {
                source_lan_address,
                source_wan_address,
                identifier,
            },
            used,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_puncture_request_is_fourteen_bytes() {
        let request = PunctureRequestPayload {
            lan_walker_address: "10.0.0.1:1".parse().unwrap(),
            wan_walker_address: "1.1.1.1:1".parse().unwrap(),
            identifier: 7,
        };
        let bytes = request.serialize();
        assert_eq!(bytes, vec![10, 0, 0, 1, 0, 1, 1, 1, 1, 1, 0, 1, 0, 7]);
        assert_eq!(PunctureRequestPayload::deserialize(&bytes).unwrap(), (request, 14));
    }

    #[test]
    fn test_puncture_ignores_trailing_bytes() {
        let mut bytes = PuncturePayload {
            source_lan_address: Address::EMPTY,
            source_wan_address: "3.3.3.3:3".parse().unwrap(),
            identifier: 1,
        }
        .serialize();
        bytes.push(0xFF);

        let (decoded, used) = PuncturePayload::deserialize(&bytes).unwrap();
        assert_eq!(used, 14);
        assert_eq!(decoded.identifier, 1);
    }
}
