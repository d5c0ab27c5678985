//! This is a reliable transport for the byte-oriented link between a sensor hub (a low-power
//!  co-processor) and the host application processor, e.g. a UART. It turns an unreliable stream
//!  of bytes into ordered, acknowledged, checksum-verified *datagrams*.
//!
//! ## Design goals
//!
//! * The abstraction is sending / receiving datagrams, i.e. defined-length chunks of data as
//!   opposed to streams of bytes
//!   * datagrams that do not fit into a single packet are split across packets and reassembled
//!     by the receiver
//! * Every packet is protected by a checksum. Corrupted packets are dropped and re-sent; they
//!   never corrupt a datagram.
//! * Datagrams are delivered exactly once and in the order they were sent
//! * There is at most one unacknowledged packet at any given time (i.e. a window size of 1).
//!   This keeps both sides' state small and is sufficient for a point-to-point link with short
//!   round trip times.
//! * Acknowledgements piggyback on outgoing payload where possible
//! * Either side can reset the link, e.g. after booting. The reset handshake syncs sequence
//!   numbers and exchanges link parameters.
//! * Enqueueing a datagram never blocks: the outgoing queue is bounded, and a full queue is
//!   reported to the caller
//! * explicitly *not* part of this transport: encryption, flow control beyond the bounded queue,
//!   and more than one outstanding packet
//!
//! ## Packet structure
//!
//! All multi-byte numbers are little endian.
//!
//! ```ascii
//!  0: preamble (2 bytes): 0x68 0x43
//!  2: header (8 bytes)
//! 10: payload (0 to MTU bytes)
//!  *: footer: checksum (u32) - CRC-32 (ISO-HDLC, i.e. the zlib / Ethernet polynomial) over
//!      preamble, header and payload
//! ```
//!
//! Bytes outside packets are ignored, so the link may pad with idle bytes.
//!
//! ## Header
//!
//! ```ascii
//! 0: flags (8 bits):
//!    * bit 0: UNFINISHED_DATAGRAM - the datagram continues in the next packet
//!    * bit 1: RESET - set on RESET packets
//!    * bit 2-7: unused, must be 0
//! 1: packet code (8 bits):
//!    * bit 0-3: error code
//!      * 0 NONE
//!      * 1 CHECKSUM - a corrupted packet was received
//!      * 2 OOM - a datagram was too big to be received
//!      * 3 BUSY
//!      * 4 HEADER - an invalid packet header was received
//!      * 5 ORDER - a packet was received out of sequence
//!      * 6 APPLAYER - application level error
//!      * F TIMEOUT - used locally, never sent
//!    * bit 4-7: attribute
//!      * 0 NONE
//!      * 1 RESET
//!      * 2 RESET_ACK
//! 2: ack seq (u8): the sequence number this side expects next, acknowledging everything before
//! 3: seq (u8): the packet's sequence number. Packets without payload repeat the previous
//!     packet's sequence number and are not acknowledged
//! 4: payload length (u16)
//! 6: reserved (u16), ignored by the receiver
//! ```
//!
//! Sequence numbers wrap around after 255. Receiving an error code that indicates a lost or
//!  corrupted packet (CHECKSUM, OOM, BUSY, HEADER, ORDER) causes the outstanding packet to be
//!  re-sent immediately rather than after the timeout.
//!
//! ## Reset handshake
//!
//! A RESET packet has the RESET flag and the RESET attribute, and it is answered by a packet with
//!  the RESET_ACK attribute. Both carry the sending side's link parameters:
//!
//! ```ascii
//! 0: protocol version major (u8)
//! 1: protocol version minor (u8)
//! 2: protocol version patch (u16)
//! 4: receive MTU (u16): maximum payload per packet accepted by the sender
//! 6: window size (u16): always 1
//! 8: ACK timeout in milliseconds (u16)
//! ```
//!
//! Both sides start over with sequence number 0 after a reset. A partially sent datagram is
//!  re-sent from its first byte, and a partially received datagram is discarded. A RESET that is
//!  not answered is repeated periodically. While the handshake is in progress, packets other than
//!  RESET and RESET_ACK are dropped.
//!
//! The effective payload per packet is the smaller of this side's link MTU (minus the packet
//!  overhead) and the receive MTU advertised by the peer. A peer with a different major version
//!  or a window size other than 1 is not accepted.

pub mod checksum;
pub mod config;
pub mod control_messages;
pub mod datagram_queue;
pub mod end_point;
pub mod error;
pub mod framing;
pub mod link_adapter;
pub mod packet;
pub mod packet_header;
pub mod receive_stream;
pub mod reset;
pub mod safe_converter;
pub mod send_stream;
pub mod timer;
pub mod transport_listener;
pub mod transport_state;
mod worker;

#[cfg(test)] mod test_util;

pub use config::TransportConfig;
pub use end_point::{LinkHandle, TransportEndPoint};
pub use error::{EnqueueError, LinkError};
pub use link_adapter::{spawn_stream_reader, LinkAdapter, LinkSendResult, StreamLink};
pub use packet_header::ErrorCode;
pub use reset::ResetState;
pub use transport_listener::TransportListener;
