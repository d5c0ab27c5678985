//! Incremental parsing of the incoming byte stream into packets. Bytes can arrive in chunks of
//!  arbitrary size, so the parser keeps track of where it is inside a packet:
//!
//! ```ascii
//! PREAMBLE -> HEADER -> PAYLOAD -> FOOTER -> PREAMBLE
//!                   \-(length 0)-/
//! ```
//!
//! Every packet, valid or not, ends with the parser back in PREAMBLE. Bytes that do not match
//!  the preamble are skipped one at a time, which allows the link to pad with idle bytes.

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};
use crate::checksum::Checksum;
use crate::packet_header::PacketHeader;
use crate::safe_converter::SafeCast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    /// looking for (or in the middle of) the packet start delimiter
    Preamble,
    Header,
    Payload,
    /// reading and verifying the checksum
    Footer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPacket {
    pub header: PacketHeader,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramerEvent {
    /// a complete packet with a valid checksum
    Packet(ReceivedPacket),
    ChecksumMismatch(PacketHeader),
    /// the header was unparseable or declared an oversized payload
    InvalidHeader,
}

pub struct PacketFramer {
    max_payload_len: usize,
    state: RxState,
    /// byte offset inside the current state, reset to 0 on every state change
    loc_in_state: usize,
    header_buf: [u8; PacketHeader::SERIALIZED_LEN],
    header: Option<PacketHeader>,
    payload: BytesMut,
    footer_buf: [u8; Checksum::SERIALIZED_LEN],
}

impl PacketFramer {
    pub fn new(max_payload_len: usize) -> PacketFramer {
        PacketFramer {
            max_payload_len,
            state: RxState::Preamble,
            loc_in_state: 0,
            header_buf: [0; PacketHeader::SERIALIZED_LEN],
            header: None,
            payload: BytesMut::new(),
            footer_buf: [0; Checksum::SERIALIZED_LEN],
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// true iff no part of a packet (not even a partial preamble) has been seen
    pub fn is_waiting_for_preamble(&self) -> bool {
        self.state == RxState::Preamble && self.loc_in_state == 0
    }

    /// discard a partially received packet, e.g. after an rx timeout
    pub fn abort_packet(&mut self) {
        if !self.is_waiting_for_preamble() {
            debug!("aborting partially received packet in state {:?}", self.state);
        }
        self.payload.clear();
        self.header = None;
        self.set_state(RxState::Preamble);
    }

    pub fn consume(&mut self, mut buf: &[u8], events: &mut Vec<FramerEvent>) {
        while !buf.is_empty() {
            let consumed = match self.state {
                RxState::Preamble => self.consume_preamble(buf),
                RxState::Header => self.consume_header(buf, events),
                RxState::Payload => self.consume_payload(buf),
                RxState::Footer => self.consume_footer(buf, events),
            };
            buf = &buf[consumed..];
        }
    }

    fn set_state(&mut self, state: RxState) {
        self.state = state;
        self.loc_in_state = 0;
    }

    fn consume_preamble(&mut self, buf: &[u8]) -> usize {
        let mut consumed = 0;
        for &b in buf {
            consumed += 1;

            if b == PacketHeader::PREAMBLE[self.loc_in_state] {
                self.loc_in_state += 1;
                if self.loc_in_state == PacketHeader::PREAMBLE.len() {
                    trace!("preamble found");
                    self.set_state(RxState::Header);
                    break;
                }
            }
            else if b == PacketHeader::PREAMBLE[0] {
                // a repeated first preamble byte may still start a preamble
                self.loc_in_state = 1;
            }
            else {
                self.loc_in_state = 0;
            }
        }
        consumed
    }

    fn consume_header(&mut self, buf: &[u8], events: &mut Vec<FramerEvent>) -> usize {
        let n = (PacketHeader::SERIALIZED_LEN - self.loc_in_state).min(buf.len());
        self.header_buf[self.loc_in_state..self.loc_in_state + n].copy_from_slice(&buf[..n]);
        self.loc_in_state += n;

        if self.loc_in_state < PacketHeader::SERIALIZED_LEN {
            return n;
        }

        let header = match PacketHeader::deser(&mut &self.header_buf[..]) {
            Ok(header) => header,
            Err(e) => {
                warn!("invalid packet header {:?}: {} - dropping", self.header_buf, e);
                events.push(FramerEvent::InvalidHeader);
                self.set_state(RxState::Preamble);
                return n;
            }
        };

        if SafeCast::<usize>::safe_cast(header.length) > self.max_payload_len {
            warn!("packet header declares payload length {} exceeding the receive MTU of {} - dropping", header.length, self.max_payload_len);
            events.push(FramerEvent::InvalidHeader);
            self.set_state(RxState::Preamble);
            return n;
        }

        trace!("received header {:?}", header);
        self.header = Some(header);
        self.payload.clear();
        if header.length == 0 {
            self.set_state(RxState::Footer);
        }
        else {
            self.payload.reserve(header.length.safe_cast());
            self.set_state(RxState::Payload);
        }
        n
    }

    fn consume_payload(&mut self, buf: &[u8]) -> usize {
        let expected_len: usize = self.header.map(|h| h.length.safe_cast()).unwrap_or(0);
        let n = (expected_len - self.payload.len()).min(buf.len());
        self.payload.extend_from_slice(&buf[..n]);

        if self.payload.len() == expected_len {
            self.set_state(RxState::Footer);
        }
        n
    }

    fn consume_footer(&mut self, buf: &[u8], events: &mut Vec<FramerEvent>) -> usize {
        let n = (Checksum::SERIALIZED_LEN - self.loc_in_state).min(buf.len());
        self.footer_buf[self.loc_in_state..self.loc_in_state + n].copy_from_slice(&buf[..n]);
        self.loc_in_state += n;

        if self.loc_in_state < Checksum::SERIALIZED_LEN {
            return n;
        }

        let footer = Checksum::from_le_bytes(self.footer_buf);
        let payload = self.payload.split().freeze();
        if let Some(header) = self.header.take() {
            if Checksum::verify(&self.header_buf, &payload, footer) {
                events.push(FramerEvent::Packet(ReceivedPacket { header, payload }));
            }
            else {
                debug!("checksum mismatch for packet {:?} - dropping", header);
                events.push(FramerEvent::ChecksumMismatch(header));
            }
        }

        self.set_state(RxState::Preamble);
        n
    }
}
