use super::{Deserializable, Reader, Serializable};
use crate::error::PacketError;

/// Sender's serialized public key, prefixed with its length as a `u16`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinMemberAuthenticationPayload {
    /// Serialized public key
    pub public_key_bin: Vec<u8>,
}

impl Serializable for BinMemberAuthenticationPayload {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        // key bins are 74 bytes, far below u16::MAX
        out.extend_from_slice(&(self.public_key_bin.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.public_key_bin);
    }
}

impl Deserializable for BinMemberAuthenticationPayload {
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let mut reader = Reader::new(buf);
        let len = reader.u16()? as usize;
        let public_key_bin = reader.take(len)?.to_vec();
        Ok((Self { public_key_bin }, reader.position()))
    }
}

/// The sender's logical clock at the time the packet was built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalTimeDistributionPayload {
    /// Claimed global time
    pub global_time: u64,
}

impl Serializable for GlobalTimeDistributionPayload {
    fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.global_time.to_be_bytes());
    }
}

impl Deserializable for GlobalTimeDistributionPayload {
    fn deserialize(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        let mut reader = Reader::new(buf);
        let global_time = reader.u64()?;
        Ok((Self { global_time }, reader.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_length_prefix() {
        let auth = BinMemberAuthenticationPayload {
            public_key_bin: vec![0xAA; 3],
        };
        assert_eq!(auth.serialize(), vec![0, 3, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn test_auth_truncated_key() {
        assert!(matches!(
            BinMemberAuthenticationPayload::deserialize(&[0, 74, 1, 2]),
            Err(PacketError::TooShort { expected: 76, .. })
        ));
    }

    #[test]
    fn test_global_time_big_endian() {
        let dist = GlobalTimeDistributionPayload { global_time: 258 };
        assert_eq!(dist.serialize(), vec![0, 0, 0, 0, 0, 0, 1, 2]);
        assert_eq!(
            GlobalTimeDistributionPayload::deserialize(&[0, 0, 0, 0, 0, 0, 1, 2, 9]).unwrap(),
            (dist, 8)
        );
    }
}
