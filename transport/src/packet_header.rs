use anyhow::{anyhow, bail};
use bitflags::bitflags;
use bytes::{Buf, BufMut};
use std::fmt::{Debug, Formatter};

bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct PacketFlags: u8 {
        /// set on every fragment of a datagram except the last one
        const UNFINISHED_DATAGRAM = 0b0000_0001;
        /// set on the first packet after boot or to reset after an irrecoverable error
        const RESET               = 0b0000_0010;
    }
}

/// Error code in the least significant nibble of the packet code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    /// no error, i.e. a plain ACK (or an implicit NAK if the ack seq does not advance)
    None = 0,
    Checksum = 1,
    /// out of memory
    Oom = 2,
    Busy = 3,
    /// invalid header
    Header = 4,
    /// out of order
    Order = 5,
    /// message incomprehensible at the application layer
    AppLayer = 6,
    /// deduced locally, never transmitted
    Timeout = 0xf,
}
impl ErrorCode {
    pub fn from_raw(raw: u8) -> anyhow::Result<ErrorCode> {
        Ok(match raw {
            0 => ErrorCode::None,
            1 => ErrorCode::Checksum,
            2 => ErrorCode::Oom,
            3 => ErrorCode::Busy,
            4 => ErrorCode::Header,
            5 => ErrorCode::Order,
            6 => ErrorCode::AppLayer,
            0xf => ErrorCode::Timeout,
            _ => bail!("unknown error code {}", raw),
        })
    }

    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// error codes that ask the peer to re-send its outstanding packet
    pub fn requests_retransmission(self) -> bool {
        matches!(self, ErrorCode::Checksum | ErrorCode::Oom | ErrorCode::Busy | ErrorCode::Header | ErrorCode::Order)
    }
}

/// Packet attribute in the most significant nibble of the packet code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketAttr {
    None = 0,
    Reset = 1,
    ResetAck = 2,
}
impl PacketAttr {
    pub fn from_raw(raw: u8) -> anyhow::Result<PacketAttr> {
        Ok(match raw {
            0 => PacketAttr::None,
            1 => PacketAttr::Reset,
            2 => PacketAttr::ResetAck,
            _ => bail!("unknown packet attribute {}", raw),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketCode {
    pub attr: PacketAttr,
    pub error: ErrorCode,
}
impl PacketCode {
    pub const NONE: PacketCode = PacketCode { attr: PacketAttr::None, error: ErrorCode::None };

    pub fn new(attr: PacketAttr, error: ErrorCode) -> PacketCode {
        PacketCode { attr, error }
    }

    pub fn to_raw(self) -> u8 {
        ((self.attr as u8) << 4) | (self.error.to_raw() & 0x0f)
    }

    pub fn from_raw(raw: u8) -> anyhow::Result<PacketCode> {
        Ok(PacketCode {
            attr: PacketAttr::from_raw(raw >> 4)?,
            error: ErrorCode::from_raw(raw & 0x0f)?,
        })
    }
}

/// The fixed-size header following the preamble. All multi-byte numbers are little endian:
///
/// ```ascii
/// 0: flags (u8)
/// 1: packet code (u8): attribute << 4 | error code
/// 2: ack seq (u8) - the next sequence number this side expects
/// 3: seq (u8)
/// 4: payload length (u16 LE)
/// 6: reserved (u16 LE), written as zero and ignored when reading
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub packet_code: PacketCode,
    pub ack_seq: u8,
    pub seq: u8,
    pub length: u16,
}
impl Debug for PacketHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PCKT{{#{} ack {} len {} {:?}/{:?} {:?}}}",
               self.seq, self.ack_seq, self.length, self.packet_code.attr, self.packet_code.error, self.flags)
    }
}

impl PacketHeader {
    pub const PREAMBLE: [u8; 2] = [0x68, 0x43];
    pub const SERIALIZED_LEN: usize = 8;

    pub fn is_unfinished(&self) -> bool {
        self.flags.contains(PacketFlags::UNFINISHED_DATAGRAM)
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(self.packet_code.to_raw());
        buf.put_u8(self.ack_seq);
        buf.put_u8(self.seq);
        buf.put_u16_le(self.length);
        buf.put_u16_le(0);
    }

    pub fn to_bytes(&self) -> [u8; Self::SERIALIZED_LEN] {
        let mut result = [0u8; Self::SERIALIZED_LEN];
        self.ser(&mut &mut result[..]);
        result
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<PacketHeader> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("incomplete packet header: {} bytes", buf.remaining());
        }

        let raw_flags = buf.get_u8();
        let flags = PacketFlags::from_bits(raw_flags)
            .ok_or_else(|| anyhow!("reserved flag bits set: {:08b}", raw_flags))?;
        let packet_code = PacketCode::from_raw(buf.get_u8())?;
        let ack_seq = buf.get_u8();
        let seq = buf.get_u8();
        let length = buf.get_u16_le();
        let _reserved = buf.get_u16_le();

        Ok(PacketHeader {
            flags,
            packet_code,
            ack_seq,
            seq,
            length,
        })
    }
}
