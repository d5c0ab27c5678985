use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};
use crate::packet_header::{PacketCode, PacketHeader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxOutcome {
    /// accepted, the datagram continues in the next packet
    Buffered,
    /// accepted, and it completed a datagram
    Delivered(Bytes),
    /// a retransmission of the packet accepted most recently, i.e. the peer missed our ACK
    Duplicate,
    OutOfOrder,
    /// accepted, but the datagram grew beyond the maximum size and was discarded
    DatagramTooLarge,
}

/// Receive-side sequence tracking and datagram reassembly. This sees only packets that passed
///  checksum verification.
pub struct ReceiveStream {
    max_datagram_size: usize,

    /// the sequence number of the next payload-bearing packet
    expected_seq: u8,
    /// the most recent ack seq received from the peer, i.e. the next sequence number it expects
    received_ack_seq: u8,
    received_packet_code: PacketCode,

    /// the datagram being reassembled; its length is the location inside the datagram
    datagram: BytesMut,
    /// set when a datagram was discarded for exceeding the maximum size: the rest of its
    ///  fragments is acknowledged but dropped
    discarding: bool,
}

impl ReceiveStream {
    pub fn new(max_datagram_size: usize) -> ReceiveStream {
        ReceiveStream {
            max_datagram_size,
            expected_seq: 0,
            received_ack_seq: 0,
            received_packet_code: PacketCode::NONE,
            datagram: BytesMut::new(),
            discarding: false,
        }
    }

    pub fn expected_seq(&self) -> u8 {
        self.expected_seq
    }

    pub fn received_ack_seq(&self) -> u8 {
        self.received_ack_seq
    }

    pub fn received_packet_code(&self) -> PacketCode {
        self.received_packet_code
    }

    pub fn loc_in_datagram(&self) -> usize {
        self.datagram.len()
    }

    /// called for every valid packet, with or without payload
    pub fn register_packet(&mut self, header: &PacketHeader) {
        self.received_ack_seq = header.ack_seq;
        self.received_packet_code = header.packet_code;
    }

    pub fn on_payload_packet(&mut self, header: &PacketHeader, payload: &[u8]) -> RxOutcome {
        debug_assert!(!payload.is_empty());

        if header.seq != self.expected_seq {
            if header.seq == self.expected_seq.wrapping_sub(1) {
                debug!("received duplicate of packet #{} - re-sending ACK", header.seq);
                return RxOutcome::Duplicate;
            }
            debug!("received packet #{} out of order, expected #{}", header.seq, self.expected_seq);
            return RxOutcome::OutOfOrder;
        }

        self.expected_seq = self.expected_seq.wrapping_add(1);

        if self.discarding {
            if !header.is_unfinished() {
                self.discarding = false;
            }
            trace!("dropping fragment #{} of oversized datagram", header.seq);
            return RxOutcome::Buffered;
        }

        if self.datagram.len() + payload.len() > self.max_datagram_size {
            warn!("incoming datagram exceeds the maximum size of {} bytes - discarding", self.max_datagram_size);
            self.datagram.clear();
            self.discarding = header.is_unfinished();
            return RxOutcome::DatagramTooLarge;
        }

        self.datagram.extend_from_slice(payload);

        if header.is_unfinished() {
            trace!("packet #{}: datagram continues, {} bytes so far", header.seq, self.datagram.len());
            return RxOutcome::Buffered;
        }

        let datagram = self.datagram.split().freeze();
        trace!("packet #{} completes datagram of {} bytes", header.seq, datagram.len());
        RxOutcome::Delivered(datagram)
    }

    /// back to the initial state, discarding a partially reassembled datagram
    pub fn reset(&mut self) {
        if !self.datagram.is_empty() {
            debug!("discarding partially received datagram of {} bytes", self.datagram.len());
        }
        self.expected_seq = 0;
        self.received_ack_seq = 0;
        self.received_packet_code = PacketCode::NONE;
        self.datagram.clear();
        self.discarding = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet_header::{ErrorCode, PacketAttr, PacketFlags};
    use rstest::rstest;

    fn header(seq: u8, unfinished: bool) -> PacketHeader {
        PacketHeader {
            flags: if unfinished { PacketFlags::UNFINISHED_DATAGRAM } else { PacketFlags::empty() },
            packet_code: PacketCode::NONE,
            ack_seq: 0,
            seq,
            length: 0,
        }
    }

    #[test]
    fn test_single_packet_datagram() {
        let mut rx = ReceiveStream::new(100);
        assert_eq!(rx.on_payload_packet(&header(0, false), &[1, 2, 3]), RxOutcome::Delivered(Bytes::from_static(&[1, 2, 3])));
        assert_eq!(rx.expected_seq(), 1);
        assert_eq!(rx.loc_in_datagram(), 0);
    }

    #[test]
    fn test_fragmented_datagram() {
        let mut rx = ReceiveStream::new(100);
        assert_eq!(rx.on_payload_packet(&header(0, true), &[1, 2]), RxOutcome::Buffered);
        assert_eq!(rx.loc_in_datagram(), 2);
        assert_eq!(rx.on_payload_packet(&header(1, true), &[3, 4]), RxOutcome::Buffered);
        assert_eq!(rx.loc_in_datagram(), 4);
        assert_eq!(rx.on_payload_packet(&header(2, false), &[5]), RxOutcome::Delivered(Bytes::from_static(&[1, 2, 3, 4, 5])));
        assert_eq!(rx.expected_seq(), 3);
        assert_eq!(rx.loc_in_datagram(), 0);
    }

    #[rstest]
    #[case::duplicate(4, 3, RxOutcome::Duplicate)]
    #[case::ahead(4, 5, RxOutcome::OutOfOrder)]
    #[case::far_behind(4, 1, RxOutcome::OutOfOrder)]
    #[case::duplicate_wrapping(0, 255, RxOutcome::Duplicate)]
    fn test_unexpected_seq(#[case] expected_seq: u8, #[case] seq: u8, #[case] expected: RxOutcome) {
        let mut rx = ReceiveStream::new(100);
        rx.expected_seq = expected_seq;
        rx.datagram.extend_from_slice(&[9, 9]);

        assert_eq!(rx.on_payload_packet(&header(seq, false), &[1]), expected);
        assert_eq!(rx.expected_seq(), expected_seq);
        assert_eq!(rx.loc_in_datagram(), 2);
    }

    #[test]
    fn test_seq_wraps_around() {
        let mut rx = ReceiveStream::new(100);
        rx.expected_seq = 255;
        assert_eq!(rx.on_payload_packet(&header(255, true), &[1]), RxOutcome::Buffered);
        assert_eq!(rx.expected_seq(), 0);
        assert_eq!(rx.on_payload_packet(&header(0, false), &[2]), RxOutcome::Delivered(Bytes::from_static(&[1, 2])));
    }

    #[test]
    fn test_oversized_datagram_is_skipped() {
        let mut rx = ReceiveStream::new(4);
        assert_eq!(rx.on_payload_packet(&header(0, true), &[1, 2, 3]), RxOutcome::Buffered);
        assert_eq!(rx.on_payload_packet(&header(1, true), &[4, 5]), RxOutcome::DatagramTooLarge);
        assert_eq!(rx.on_payload_packet(&header(2, true), &[6]), RxOutcome::Buffered);
        assert_eq!(rx.on_payload_packet(&header(3, false), &[7]), RxOutcome::Buffered);
        assert_eq!(rx.loc_in_datagram(), 0);

        // the next datagram is received normally
        assert_eq!(rx.on_payload_packet(&header(4, false), &[8, 9]), RxOutcome::Delivered(Bytes::from_static(&[8, 9])));
    }

    #[test]
    fn test_register_packet() {
        let mut rx = ReceiveStream::new(100);
        let code = PacketCode::new(PacketAttr::None, ErrorCode::Order);
        rx.register_packet(&PacketHeader { ack_seq: 17, packet_code: code, ..header(3, false) });
        assert_eq!(rx.received_ack_seq(), 17);
        assert_eq!(rx.received_packet_code(), code);
        assert_eq!(rx.expected_seq(), 0);
    }

    #[test]
    fn test_reset() {
        let mut rx = ReceiveStream::new(100);
        rx.on_payload_packet(&header(0, false), &[1]);
        rx.on_payload_packet(&header(1, true), &[2]);
        rx.register_packet(&PacketHeader { ack_seq: 5, ..header(1, false) });

        rx.reset();
        assert_eq!(rx.expected_seq(), 0);
        assert_eq!(rx.received_ack_seq(), 0);
        assert_eq!(rx.loc_in_datagram(), 0);
    }
}
