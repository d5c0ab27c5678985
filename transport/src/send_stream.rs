use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};
use crate::datagram_queue::DatagramQueue;
use crate::packet::encode_packet;
use crate::packet_header::{ErrorCode, PacketAttr, PacketCode, PacketFlags, PacketHeader};
use crate::safe_converter::PrecheckedCast;

/// The payload-bearing packet that was sent but is not acknowledged yet. Its payload starts at
///  the front datagram's acked location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outstanding {
    seq: u8,
    len: usize,
    flags: PacketFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    NothingOutstanding,
    /// the ack seq does not cover the outstanding packet, i.e. an implicit NAK
    NotAcked,
    PacketAcked,
    /// the acknowledged packet was the front datagram's last
    DatagramCompleted,
}

/// Summary of a packet written by [SendStream::next_packet]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentPacket {
    pub header: PacketHeader,
    pub is_retransmission: bool,
}
impl SentPacket {
    /// only payload-bearing packets are acknowledged and need a retransmission timer
    pub fn carries_payload(&self) -> bool {
        self.header.length > 0
    }
}

/// The transmit side of the transport: it owns the queue of outgoing datagrams, slices the front
///  datagram into packets and keeps track of what the peer acknowledged.
///
/// There is at most one unacknowledged payload packet at any given time. Everything this side
///  needs to tell the peer (ACKs and error codes) piggybacks on the next outgoing packet, and an
///  ACK-only packet is sent only when there is no payload to carry it.
pub struct SendStream {
    queue: DatagramQueue,

    next_seq: u8,
    /// the ack seq carried by the most recently sent packet
    sent_ack_seq: u8,
    /// the number of bytes of the front datagram that were sent, acknowledged or not
    sent_loc_in_datagram: usize,
    acked_loc_in_datagram: usize,

    outstanding: Option<Outstanding>,
    retransmit_pending: bool,
    consecutive_timeouts: u32,

    /// received payload that was not acknowledged yet
    ack_pending: bool,
    /// an ACK must go out even if there is no payload to carry it
    ack_due: bool,
    packet_code_to_send: ErrorCode,

    /// set while the link adapter is busy with a packet
    link_busy: bool,
}

impl SendStream {
    pub fn new(queue_len: usize) -> SendStream {
        SendStream {
            queue: DatagramQueue::new(queue_len),
            next_seq: 0,
            sent_ack_seq: 0,
            sent_loc_in_datagram: 0,
            acked_loc_in_datagram: 0,
            outstanding: None,
            retransmit_pending: false,
            consecutive_timeouts: 0,
            ack_pending: false,
            ack_due: false,
            packet_code_to_send: ErrorCode::None,
            link_busy: false,
        }
    }

    pub fn enqueue(&mut self, datagram: Bytes) -> Result<(), Bytes> {
        self.queue.push_back(datagram)?;
        trace!("enqueued datagram, {} pending", self.queue.len());
        Ok(())
    }

    pub fn pending_datagrams(&self) -> usize {
        self.queue.len()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn next_seq(&self) -> u8 {
        self.next_seq
    }

    /// the sequence number of the most recent payload packet, which is what ACK-only packets carry
    pub fn sent_seq(&self) -> u8 {
        self.next_seq.wrapping_sub(1)
    }

    pub fn sent_ack_seq(&self) -> u8 {
        self.sent_ack_seq
    }

    pub fn sent_loc_in_datagram(&self) -> usize {
        self.sent_loc_in_datagram
    }

    pub fn acked_loc_in_datagram(&self) -> usize {
        self.acked_loc_in_datagram
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn packet_code_to_send(&self) -> ErrorCode {
        self.packet_code_to_send
    }

    pub fn is_link_busy(&self) -> bool {
        self.link_busy
    }

    pub fn set_link_busy(&mut self, link_busy: bool) {
        self.link_busy = link_busy;
    }

    /// The error code goes out with the next packet. A later error overwrites an earlier one that
    ///  was not sent yet.
    pub fn set_error_to_send(&mut self, code: ErrorCode) {
        trace!("scheduling error code {:?}", code);
        self.packet_code_to_send = code;
    }

    /// Registers received payload that needs acknowledging. If `immediate` is false, the ACK waits
    ///  for outgoing payload or for [SendStream::on_ack_delay_elapsed].
    pub fn request_ack(&mut self, immediate: bool) {
        self.ack_pending = true;
        if immediate {
            self.ack_due = true;
        }
    }

    pub fn on_ack_delay_elapsed(&mut self) {
        if self.ack_pending {
            self.ack_due = true;
        }
    }

    pub fn register_ack(&mut self, ack_seq: u8) -> AckOutcome {
        let Some(outstanding) = self.outstanding else {
            return AckOutcome::NothingOutstanding;
        };

        if ack_seq != outstanding.seq.wrapping_add(1) {
            trace!("ack seq {} does not cover outstanding packet #{}", ack_seq, outstanding.seq);
            return AckOutcome::NotAcked;
        }

        trace!("packet #{} acknowledged", outstanding.seq);
        self.outstanding = None;
        self.retransmit_pending = false;
        self.consecutive_timeouts = 0;
        self.acked_loc_in_datagram += outstanding.len;

        let front_len = self.queue.front().map(|d| d.len()).unwrap_or(0);
        if self.acked_loc_in_datagram < front_len {
            return AckOutcome::PacketAcked;
        }

        self.queue.pop_front();
        self.sent_loc_in_datagram = 0;
        self.acked_loc_in_datagram = 0;
        debug!("datagram acknowledged, {} pending", self.queue.len());
        AckOutcome::DatagramCompleted
    }

    /// Re-sends the outstanding packet with the next opportunity. Returns false if there is
    ///  nothing to retransmit.
    pub fn request_retransmission(&mut self) -> bool {
        if self.outstanding.is_none() {
            return false;
        }
        self.retransmit_pending = true;
        true
    }

    /// Returns the number of consecutive timeouts for the outstanding packet, or `None` if the
    ///  timeout is stale.
    pub fn on_timeout(&mut self) -> Option<u32> {
        let outstanding = self.outstanding?;

        self.consecutive_timeouts += 1;
        self.retransmit_pending = true;
        debug!("packet #{}: {:?} #{}", outstanding.seq, ErrorCode::Timeout, self.consecutive_timeouts);
        Some(self.consecutive_timeouts)
    }

    pub fn has_packet_to_send(&self) -> bool {
        if self.link_busy {
            return false;
        }
        if self.retransmit_pending && self.outstanding.is_some() {
            return true;
        }
        if self.outstanding.is_none() {
            if let Some(front) = self.queue.front() {
                if self.sent_loc_in_datagram < front.len() {
                    return true;
                }
            }
        }
        self.ack_due || self.packet_code_to_send != ErrorCode::None
    }

    /// Writes the next packet to `buf` if there is one, in this order of priority: retransmission,
    ///  new payload, ACK / error without payload.
    ///
    /// Every packet carries `ack_seq` and the pending error code, so sending it clears both.
    pub fn next_packet(&mut self, ack_seq: u8, tx_mtu: usize, buf: &mut BytesMut) -> Option<SentPacket> {
        if !self.has_packet_to_send() {
            return None;
        }

        let outstanding = self.outstanding;
        let (flags, seq, payload, is_retransmission) = match outstanding {
            Some(outstanding) if self.retransmit_pending => {
                self.retransmit_pending = false;
                let payload = self.outstanding_payload(&outstanding);
                debug!("retransmitting packet #{}", outstanding.seq);
                (outstanding.flags, outstanding.seq, payload, true)
            }
            None if self.has_unsent_payload() => self.next_chunk(tx_mtu),
            _ => (PacketFlags::empty(), self.sent_seq(), Bytes::new(), false),
        };

        let header = PacketHeader {
            flags,
            packet_code: PacketCode::new(PacketAttr::None, self.packet_code_to_send),
            ack_seq,
            seq,
            length: payload.len().prechecked_cast(),
        };
        encode_packet(&header, &payload, buf);

        self.sent_ack_seq = ack_seq;
        self.ack_pending = false;
        self.ack_due = false;
        self.packet_code_to_send = ErrorCode::None;
        self.link_busy = true;

        Some(SentPacket { header, is_retransmission })
    }

    fn has_unsent_payload(&self) -> bool {
        self.queue.front()
            .map(|d| self.sent_loc_in_datagram < d.len())
            .unwrap_or(false)
    }

    fn outstanding_payload(&self, outstanding: &Outstanding) -> Bytes {
        match self.queue.front() {
            Some(front) => front.slice(self.acked_loc_in_datagram..self.acked_loc_in_datagram + outstanding.len),
            None => Bytes::new(),
        }
    }

    fn next_chunk(&mut self, tx_mtu: usize) -> (PacketFlags, u8, Bytes, bool) {
        let Some(front) = self.queue.front() else {
            return (PacketFlags::empty(), self.sent_seq(), Bytes::new(), false);
        };

        let remaining = front.len() - self.sent_loc_in_datagram;
        let len = remaining.min(tx_mtu);
        let payload = front.slice(self.sent_loc_in_datagram..self.sent_loc_in_datagram + len);
        let flags = if len < remaining {
            PacketFlags::UNFINISHED_DATAGRAM
        }
        else {
            PacketFlags::empty()
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.sent_loc_in_datagram += len;
        self.outstanding = Some(Outstanding { seq, len, flags });

        trace!("sending packet #{} with {} bytes, {} of datagram remaining", seq, len, remaining - len);
        (flags, seq, payload, false)
    }

    /// Back to sequence number 0, restarting the front datagram. Queued datagrams survive.
    pub fn reset(&mut self) {
        if self.sent_loc_in_datagram > 0 {
            debug!("restarting partially sent datagram");
        }
        self.next_seq = 0;
        self.sent_ack_seq = 0;
        self.sent_loc_in_datagram = 0;
        self.acked_loc_in_datagram = 0;
        self.outstanding = None;
        self.retransmit_pending = false;
        self.consecutive_timeouts = 0;
        self.ack_pending = false;
        self.ack_due = false;
        self.packet_code_to_send = ErrorCode::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{FramerEvent, PacketFramer};
    use crate::receive_stream::{ReceiveStream, RxOutcome};
    use rstest::rstest;

    /// parses the single packet in `buf`
    fn parse(buf: &BytesMut) -> (PacketHeader, Bytes) {
        let mut framer = PacketFramer::new(1000);
        let mut events = Vec::new();
        framer.consume(buf, &mut events);
        assert_eq!(events.len(), 1);
        match events.remove(0) {
            FramerEvent::Packet(p) => (p.header, p.payload),
            e => panic!("unexpected framer event {:?}", e),
        }
    }

    fn send(stream: &mut SendStream, ack_seq: u8, tx_mtu: usize) -> Option<(PacketHeader, Bytes)> {
        let mut buf = BytesMut::new();
        let sent = stream.next_packet(ack_seq, tx_mtu, &mut buf)?;
        stream.set_link_busy(false);
        let (header, payload) = parse(&buf);
        assert_eq!(header, sent.header);
        Some((header, payload))
    }

    #[test]
    fn test_nothing_to_send() {
        let mut stream = SendStream::new(4);
        assert!(!stream.has_packet_to_send());
        assert!(send(&mut stream, 0, 100).is_none());
    }

    #[test]
    fn test_single_packet_datagram() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"abc")).unwrap();

        let (header, payload) = send(&mut stream, 7, 100).unwrap();
        assert_eq!(header.seq, 0);
        assert_eq!(header.ack_seq, 7);
        assert_eq!(header.flags, PacketFlags::empty());
        assert_eq!(payload, Bytes::from_static(b"abc"));
        assert!(stream.has_outstanding());
        assert_eq!(stream.next_seq(), 1);
        assert_eq!(stream.sent_ack_seq(), 7);

        assert_eq!(stream.register_ack(1), AckOutcome::DatagramCompleted);
        assert!(!stream.has_outstanding());
        assert!(stream.is_drained());
    }

    #[test]
    fn test_fragmentation() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"0123456789")).unwrap();

        let (h, p) = send(&mut stream, 0, 4).unwrap();
        assert_eq!((h.seq, h.flags, p), (0, PacketFlags::UNFINISHED_DATAGRAM, Bytes::from_static(b"0123")));
        assert_eq!(stream.sent_loc_in_datagram(), 4);

        // window of 1: nothing new before the ACK
        assert!(send(&mut stream, 0, 4).is_none());

        assert_eq!(stream.register_ack(1), AckOutcome::PacketAcked);
        assert_eq!(stream.acked_loc_in_datagram(), 4);
        let (h, p) = send(&mut stream, 0, 4).unwrap();
        assert_eq!((h.seq, h.flags, p), (1, PacketFlags::UNFINISHED_DATAGRAM, Bytes::from_static(b"4567")));

        assert_eq!(stream.register_ack(2), AckOutcome::PacketAcked);
        let (h, p) = send(&mut stream, 0, 4).unwrap();
        assert_eq!((h.seq, h.flags, p), (2, PacketFlags::empty(), Bytes::from_static(b"89")));

        assert_eq!(stream.register_ack(3), AckOutcome::DatagramCompleted);
        assert!(stream.is_drained());
        assert_eq!(stream.sent_loc_in_datagram(), 0);
    }

    #[rstest]
    #[case::tiny_mtu(1)]
    #[case::small_mtu(4)]
    #[case::uart_mtu(64)]
    #[case::large_mtu(250)]
    fn test_three_mtus_plus_one_byte(#[case] tx_mtu: usize) {
        let datagram: Bytes = (0..3 * tx_mtu + 1).map(|i| i as u8).collect::<Vec<u8>>().into();
        let mut stream = SendStream::new(4);
        stream.enqueue(datagram.clone()).unwrap();

        let mut receiver = ReceiveStream::new(1000);
        let mut sent = Vec::new();
        let mut delivered = Vec::new();
        while let Some((header, payload)) = send(&mut stream, receiver.expected_seq(), tx_mtu) {
            sent.push((header.seq, header.flags, payload.len()));
            match receiver.on_payload_packet(&header, &payload) {
                RxOutcome::Buffered => {}
                RxOutcome::Delivered(d) => delivered.push(d),
                other => panic!("unexpected {:?}", other),
            }
            stream.register_ack(receiver.expected_seq());
        }

        assert_eq!(sent, vec![
            (0, PacketFlags::UNFINISHED_DATAGRAM, tx_mtu),
            (1, PacketFlags::UNFINISHED_DATAGRAM, tx_mtu),
            (2, PacketFlags::UNFINISHED_DATAGRAM, tx_mtu),
            (3, PacketFlags::empty(), 1),
        ]);
        assert_eq!(delivered, vec![datagram]);
        assert!(stream.is_drained());
    }

    #[rstest]
    #[case::same_seq(0)]
    #[case::old_seq(200)]
    fn test_ack_not_covering_outstanding(#[case] ack_seq: u8) {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"abc")).unwrap();
        send(&mut stream, 0, 100).unwrap();

        assert_eq!(stream.register_ack(ack_seq), AckOutcome::NotAcked);
        assert!(stream.has_outstanding());
        assert_eq!(stream.pending_datagrams(), 1);
    }

    #[test]
    fn test_ack_without_outstanding() {
        let mut stream = SendStream::new(4);
        assert_eq!(stream.register_ack(1), AckOutcome::NothingOutstanding);
    }

    #[test]
    fn test_retransmission_on_timeout() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"0123456789")).unwrap();
        send(&mut stream, 0, 6).unwrap();

        assert_eq!(stream.on_timeout(), Some(1));
        let (h, p) = send(&mut stream, 5, 6).unwrap();
        assert_eq!((h.seq, h.ack_seq, h.flags, p), (0, 5, PacketFlags::UNFINISHED_DATAGRAM, Bytes::from_static(b"012345")));
        assert_eq!(stream.next_seq(), 1);

        assert_eq!(stream.on_timeout(), Some(2));
        send(&mut stream, 5, 6).unwrap();

        assert_eq!(stream.register_ack(1), AckOutcome::PacketAcked);
        assert_eq!(stream.consecutive_timeouts(), 0);
        assert_eq!(stream.on_timeout(), None);
    }

    #[test]
    fn test_retransmission_keeps_chunk_boundaries() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"0123456789")).unwrap();
        send(&mut stream, 0, 6).unwrap();

        assert!(stream.request_retransmission());
        // a smaller MTU after the fact must not change the packet's content
        let (h, p) = send(&mut stream, 0, 2).unwrap();
        assert_eq!((h.seq, p), (0, Bytes::from_static(b"012345")));
    }

    #[test]
    fn test_request_retransmission_without_outstanding() {
        let mut stream = SendStream::new(4);
        assert!(!stream.request_retransmission());
        assert!(!stream.has_packet_to_send());
    }

    #[test]
    fn test_ack_only_packet_reuses_seq() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"a")).unwrap();
        send(&mut stream, 0, 100).unwrap();
        stream.register_ack(1);

        stream.request_ack(true);
        let (h, p) = send(&mut stream, 3, 100).unwrap();
        assert_eq!((h.seq, h.ack_seq, h.length), (0, 3, 0));
        assert!(p.is_empty());
        assert!(!stream.has_outstanding());
        assert!(!stream.has_packet_to_send());
    }

    #[test]
    fn test_delayed_ack() {
        let mut stream = SendStream::new(4);
        stream.request_ack(false);
        assert!(!stream.has_packet_to_send());

        stream.on_ack_delay_elapsed();
        assert!(stream.has_packet_to_send());
        send(&mut stream, 1, 100).unwrap();

        // no pending ACK: nothing becomes due
        stream.on_ack_delay_elapsed();
        assert!(!stream.has_packet_to_send());
    }

    #[test]
    fn test_payload_carries_pending_ack_and_error() {
        let mut stream = SendStream::new(4);
        stream.request_ack(false);
        stream.set_error_to_send(ErrorCode::Order);
        stream.enqueue(Bytes::from_static(b"xy")).unwrap();

        let (h, _) = send(&mut stream, 9, 100).unwrap();
        assert_eq!(h.packet_code, PacketCode::new(PacketAttr::None, ErrorCode::Order));
        assert_eq!(h.ack_seq, 9);
        assert_eq!(h.length, 2);

        stream.on_ack_delay_elapsed();
        assert!(!stream.has_packet_to_send());
        assert_eq!(stream.packet_code_to_send(), ErrorCode::None);
    }

    #[test]
    fn test_error_only_packet() {
        let mut stream = SendStream::new(4);
        stream.set_error_to_send(ErrorCode::Checksum);
        let (h, p) = send(&mut stream, 0, 100).unwrap();
        assert_eq!(h.packet_code.error, ErrorCode::Checksum);
        assert!(p.is_empty());
    }

    #[test]
    fn test_link_busy_blocks_sending() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"a")).unwrap();
        stream.set_link_busy(true);
        assert!(!stream.has_packet_to_send());
        assert!(stream.next_packet(0, 100, &mut BytesMut::new()).is_none());
    }

    #[test]
    fn test_seq_wraps_around() {
        let mut stream = SendStream::new(4);
        for i in 0..300u32 {
            stream.enqueue(Bytes::from(vec![1u8])).unwrap();
            let (h, _) = send(&mut stream, 0, 100).unwrap();
            assert_eq!(h.seq, i as u8);
            assert_eq!(stream.register_ack(h.seq.wrapping_add(1)), AckOutcome::DatagramCompleted);
        }
    }

    #[test]
    fn test_reset_restarts_front_datagram() {
        let mut stream = SendStream::new(4);
        stream.enqueue(Bytes::from_static(b"0123456789")).unwrap();
        stream.enqueue(Bytes::from_static(b"second")).unwrap();
        send(&mut stream, 0, 4).unwrap();
        stream.register_ack(1);
        send(&mut stream, 0, 4).unwrap();
        stream.set_error_to_send(ErrorCode::Busy);

        stream.reset();
        assert_eq!(stream.next_seq(), 0);
        assert!(!stream.has_outstanding());
        assert_eq!(stream.pending_datagrams(), 2);
        assert_eq!(stream.packet_code_to_send(), ErrorCode::None);

        let (h, p) = send(&mut stream, 0, 4).unwrap();
        assert_eq!((h.seq, p), (0, Bytes::from_static(b"0123")));
    }
}
