use bytes::{BufMut, BytesMut};
use tracing::trace;
use crate::checksum::Checksum;
use crate::packet_header::PacketHeader;

/// number of bytes a packet adds to its payload on the wire: preamble, header and footer
pub const PACKET_OVERHEAD: usize = PacketHeader::PREAMBLE.len() + PacketHeader::SERIALIZED_LEN + Checksum::SERIALIZED_LEN;

/// The maximum transport payload that fits into a link-level packet of the given size
pub fn max_payload_len(link_mtu: usize) -> usize {
    link_mtu.saturating_sub(PACKET_OVERHEAD)
}

/// Appends a complete packet (preamble, header, payload, footer) to `buf`.
pub fn encode_packet(header: &PacketHeader, payload: &[u8], buf: &mut BytesMut) {
    debug_assert_eq!(header.length as usize, payload.len());

    let header_bytes = header.to_bytes();
    let checksum = Checksum::compute(&header_bytes, payload);

    buf.reserve(PACKET_OVERHEAD + payload.len());
    buf.put_slice(&PacketHeader::PREAMBLE);
    buf.put_slice(&header_bytes);
    buf.put_slice(payload);
    buf.put_slice(&checksum.to_le_bytes());

    trace!("encoded packet {:?} with checksum {:?}", header, checksum);
}
