use std::fmt::{Debug, Formatter};
use crc::{Crc, CRC_32_ISO_HDLC};
use crate::packet_header::PacketHeader;

static PACKET_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// The packet footer: a CRC-32 (IEEE 802.3, a.k.a. CRC-32/ISO-HDLC) covering preamble, header
///  and payload, transmitted little endian.
///
/// Both ends of a link must agree on the algorithm, so it is part of the wire contract.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct Checksum(pub u32);
impl Debug for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x?}", self.0)
    }
}
impl Checksum {
    pub const SERIALIZED_LEN: usize = size_of::<u32>();

    pub fn compute(header: &[u8; PacketHeader::SERIALIZED_LEN], payload: &[u8]) -> Checksum {
        let mut digest = PACKET_CRC.digest();
        digest.update(&PacketHeader::PREAMBLE);
        digest.update(header);
        digest.update(payload);
        Checksum(digest.finalize())
    }

    pub fn verify(header: &[u8; PacketHeader::SERIALIZED_LEN], payload: &[u8], footer: Checksum) -> bool {
        Self::compute(header, payload) == footer
    }

    pub fn to_le_bytes(self) -> [u8; Self::SERIALIZED_LEN] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(raw: [u8; Self::SERIALIZED_LEN]) -> Checksum {
        Checksum(u32::from_le_bytes(raw))
    }
}
