use anyhow::bail;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// incremented for breaking changes
    pub major: u8,
    /// incremented for backwards compatible changes
    pub minor: u8,
    pub patch: u16,
}
impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 0, patch: 0 };
}

/// The payload of RESET and RESET_ACK packets, advertising this side's link parameters:
///
/// ```ascii
/// 0: version major (u8)
/// 1: version minor (u8)
/// 2: version patch (u16 LE)
/// 4: receive MTU, i.e. the maximum payload per packet this side accepts (u16 LE)
/// 6: window size (u16 LE) - always 1
/// 8: timeout for receiving an ACK in milliseconds (u16 LE)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportConfiguration {
    pub version: ProtocolVersion,
    pub rx_mtu: u16,
    pub window_size: u16,
    pub timeout_ms: u16,
}

impl TransportConfiguration {
    pub const SERIALIZED_LEN: usize = 10;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version.major);
        buf.put_u8(self.version.minor);
        buf.put_u16_le(self.version.patch);
        buf.put_u16_le(self.rx_mtu);
        buf.put_u16_le(self.window_size);
        buf.put_u16_le(self.timeout_ms);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<TransportConfiguration> {
        if buf.remaining() < Self::SERIALIZED_LEN {
            bail!("transport configuration requires {} bytes, got {}", Self::SERIALIZED_LEN, buf.remaining());
        }

        Ok(TransportConfiguration {
            version: ProtocolVersion {
                major: buf.get_u8(),
                minor: buf.get_u8(),
                patch: buf.get_u16_le(),
            },
            rx_mtu: buf.get_u16_le(),
            window_size: buf.get_u16_le(),
            timeout_ms: buf.get_u16_le(),
        })
    }

    /// Checks a peer's advertised configuration for compatibility with this side
    pub fn check_compatible(&self, peer: &TransportConfiguration) -> anyhow::Result<()> {
        if peer.version.major != self.version.major {
            bail!("incompatible protocol version {:?}, local version is {:?}", peer.version, self.version);
        }
        if peer.window_size != 1 {
            bail!("unsupported window size {}", peer.window_size);
        }
        if peer.rx_mtu == 0 {
            bail!("peer advertises a receive MTU of 0");
        }
        Ok(())
    }
}
