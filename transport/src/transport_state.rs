use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, trace, warn};
use crate::config::TransportConfig;
use crate::control_messages::TransportConfiguration;
use crate::error::{EnqueueError, LinkError};
use crate::framing::{FramerEvent, PacketFramer, ReceivedPacket};
use crate::packet_header::{ErrorCode, PacketAttr, PacketFlags, PacketHeader};
use crate::receive_stream::{ReceiveStream, RxOutcome};
use crate::reset::{ResetHandshake, ResetState};
use crate::safe_converter::SafeCast;
use crate::send_stream::{AckOutcome, SendStream};
use crate::timer::TimerKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// (re)starts the timer, replacing a running one
    Arm(TimerKind),
    Cancel(TimerKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Datagram(Bytes),
    /// the link was reset while it was up: datagrams in flight in either direction may be lost
    LinkReset,
}

/// What the caller must do after a call into [TransportState]: notify the application and
///  start or stop timers. Application events are in the order they occurred.
#[derive(Debug, Default)]
pub struct Effects {
    pub app_events: Vec<AppEvent>,
    pub timers: Vec<TimerCommand>,
    /// number of consecutive tx timeouts if the outstanding packet timed out
    pub tx_timeouts: Option<u32>,
}
impl Effects {
    fn arm(&mut self, kind: TimerKind) {
        self.timers.push(TimerCommand::Arm(kind));
    }

    fn cancel(&mut self, kind: TimerKind) {
        self.timers.push(TimerCommand::Cancel(kind));
    }

    pub fn delivered(&self) -> impl Iterator<Item = &Bytes> {
        self.app_events.iter().filter_map(|e| match e {
            AppEvent::Datagram(d) => Some(d),
            AppEvent::LinkReset => None,
        })
    }
}

/// The complete protocol state of one end of the link. This does no I/O and has no notion of
///  time: incoming bytes, link completions and timer expiries are fed in, and the resulting
///  [Effects] tell the caller what to do. Outgoing packets are pulled with
///  [TransportState::next_packet].
pub struct TransportState {
    config: Arc<TransportConfig>,

    framer: PacketFramer,
    rx: ReceiveStream,
    tx: SendStream,
    reset: ResetHandshake,

    /// the maximum payload per outgoing packet, negotiated with the peer
    tx_mtu: usize,
    accepting: bool,
    /// the tx timeout runs from a packet's first transmission until it is acked or expires
    tx_timer_armed: bool,
    ack_timer_armed: bool,
    rx_timer_armed: bool,
}

impl TransportState {
    pub fn new(config: Arc<TransportConfig>) -> TransportState {
        TransportState {
            framer: PacketFramer::new(config.rx_mtu),
            rx: ReceiveStream::new(config.max_datagram_size),
            tx: SendStream::new(config.tx_datagram_queue_len),
            reset: ResetHandshake::new(config.local_configuration()),
            tx_mtu: config.tx_mtu(),
            accepting: true,
            tx_timer_armed: false,
            ack_timer_armed: false,
            rx_timer_armed: false,
            config,
        }
    }

    pub fn reset_state(&self) -> ResetState {
        self.reset.state()
    }

    pub fn tx_mtu(&self) -> usize {
        self.tx_mtu
    }

    pub fn peer_configuration(&self) -> Option<&TransportConfiguration> {
        self.reset.peer_configuration()
    }

    pub fn receive_stream(&self) -> &ReceiveStream {
        &self.rx
    }

    pub fn send_stream(&self) -> &SendStream {
        &self.tx
    }

    pub fn pending_datagrams(&self) -> usize {
        self.tx.pending_datagrams()
    }

    pub fn is_drained(&self) -> bool {
        self.tx.is_drained()
    }

    pub fn enqueue_datagram(&mut self, datagram: Bytes) -> Result<(), EnqueueError> {
        if !self.accepting {
            return Err(EnqueueError::ShuttingDown(datagram));
        }
        if datagram.is_empty() {
            return Err(EnqueueError::Empty);
        }
        if datagram.len() > self.config.max_datagram_size {
            return Err(EnqueueError::TooLarge { datagram, max: self.config.max_datagram_size });
        }
        self.tx.enqueue(datagram)
            .map_err(EnqueueError::QueueFull)
    }

    /// Reports an error condition to the peer with the next packet. A timeout is detected by each
    ///  side locally and is never sent.
    pub fn enqueue_error(&mut self, code: ErrorCode) {
        if code == ErrorCode::Timeout {
            warn!("{:?} is not sent to the peer - ignoring", code);
            return;
        }
        self.tx.set_error_to_send(code);
    }

    /// New datagrams are rejected from now on, queued datagrams are still sent
    pub fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    pub fn start_reset(&mut self, fx: &mut Effects) {
        let previous = self.reset.initiate();
        self.reset_sequence_state(fx);
        fx.cancel(TimerKind::ResetRetry);
        if previous == ResetState::None {
            fx.app_events.push(AppEvent::LinkReset);
        }
    }

    /// Feeds bytes from the link, in chunks of any size. Returns true if the receiver is waiting
    ///  for the start of a packet afterwards, i.e. it is not in the middle of one.
    pub fn on_rx_bytes(&mut self, bytes: &[u8], fx: &mut Effects) -> bool {
        let mut events = Vec::new();
        self.framer.consume(bytes, &mut events);

        for event in events {
            match event {
                FramerEvent::Packet(packet) => self.on_packet(packet, fx),
                FramerEvent::ChecksumMismatch(header) => self.on_corrupt_packet(ErrorCode::Checksum, Some(header)),
                FramerEvent::InvalidHeader => self.on_corrupt_packet(ErrorCode::Header, None),
            }
        }

        let waiting = self.framer.is_waiting_for_preamble();
        if !waiting {
            // restarts the countdown with every chunk of a stalled packet
            fx.arm(TimerKind::RxTimeout);
            self.rx_timer_armed = true;
        }
        else if self.rx_timer_armed {
            fx.cancel(TimerKind::RxTimeout);
            self.rx_timer_armed = false;
        }
        waiting
    }

    /// Called when the link finished sending the packet handed out by
    ///  [TransportState::next_packet]. A failed send is recovered by the retransmission timer.
    pub fn on_link_send_done(&mut self, result: Result<(), LinkError>) {
        if let Err(e) = result {
            warn!("link failed to send packet: {}", e);
        }
        self.tx.set_link_busy(false);
    }

    pub fn on_timer(&mut self, kind: TimerKind, fx: &mut Effects) {
        match kind {
            TimerKind::TxTimeout => {
                self.tx_timer_armed = false;
                if let Some(count) = self.tx.on_timeout() {
                    fx.tx_timeouts = Some(count);
                }
            }
            TimerKind::AckDelay => {
                self.ack_timer_armed = false;
                self.tx.on_ack_delay_elapsed();
            }
            TimerKind::ResetRetry => {
                self.reset.on_retry_timer();
            }
            TimerKind::RxTimeout => {
                self.rx_timer_armed = false;
                if !self.framer.is_waiting_for_preamble() {
                    debug!("rx timeout in state {:?}", self.framer.state());
                    self.framer.abort_packet();
                }
            }
        }
    }

    /// Writes the next packet to send to `buf`, returning false if there is none. While the link
    ///  is busy, there is never a next packet.
    pub fn next_packet(&mut self, buf: &mut BytesMut, fx: &mut Effects) -> bool {
        if self.tx.is_link_busy() {
            return false;
        }

        if let Some(attr) = self.reset.next_packet(buf) {
            self.tx.set_link_busy(true);
            if attr == PacketAttr::Reset {
                fx.arm(TimerKind::ResetRetry);
            }
            return true;
        }

        if self.reset.is_resetting() {
            return false;
        }

        let Some(sent) = self.tx.next_packet(self.rx.expected_seq(), self.tx_mtu, buf) else {
            return false;
        };

        trace!("sending {:?}", sent.header);
        // a retransmission requested by the peer's error code does not restart a running timer
        if sent.carries_payload() && !(sent.is_retransmission && self.tx_timer_armed) {
            fx.arm(TimerKind::TxTimeout);
            self.tx_timer_armed = true;
        }
        if self.ack_timer_armed {
            fx.cancel(TimerKind::AckDelay);
            self.ack_timer_armed = false;
        }
        true
    }

    fn on_corrupt_packet(&mut self, code: ErrorCode, header: Option<PacketHeader>) {
        if self.reset.is_resetting() {
            return;
        }
        debug!("reporting {:?} to peer for packet {:?}", code, header);
        self.tx.set_error_to_send(code);
    }

    fn on_packet(&mut self, packet: ReceivedPacket, fx: &mut Effects) {
        match packet.header.packet_code.attr {
            PacketAttr::Reset => self.on_reset_packet(packet, fx),
            PacketAttr::ResetAck => self.on_reset_ack_packet(packet, fx),
            PacketAttr::None => self.on_data_packet(packet, fx),
        }
    }

    fn parse_peer_configuration(&self, packet: &ReceivedPacket) -> Option<TransportConfiguration> {
        let peer = match TransportConfiguration::deser(&mut &packet.payload[..]) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("invalid {:?} payload: {} - dropping", packet.header.packet_code.attr, e);
                return None;
            }
        };
        if let Err(e) = self.reset.local_configuration().check_compatible(&peer) {
            warn!("rejecting {:?} from incompatible peer: {}", packet.header.packet_code.attr, e);
            return None;
        }
        Some(peer)
    }

    fn on_reset_packet(&mut self, packet: ReceivedPacket, fx: &mut Effects) {
        if !packet.header.flags.contains(PacketFlags::RESET) {
            warn!("RESET packet without the reset flag - dropping");
            return;
        }
        let Some(peer) = self.parse_peer_configuration(&packet) else {
            return;
        };

        let previous = self.reset.on_reset_received(peer);
        self.reset_sequence_state(fx);
        self.apply_peer_configuration(&peer);
        fx.cancel(TimerKind::ResetRetry);
        if previous == ResetState::None {
            fx.app_events.push(AppEvent::LinkReset);
        }
    }

    fn on_reset_ack_packet(&mut self, packet: ReceivedPacket, fx: &mut Effects) {
        let Some(peer) = self.parse_peer_configuration(&packet) else {
            return;
        };

        if self.reset.on_reset_ack_received(peer) {
            self.apply_peer_configuration(&peer);
            fx.cancel(TimerKind::ResetRetry);
        }
    }

    fn apply_peer_configuration(&mut self, peer: &TransportConfiguration) {
        self.tx_mtu = self.config.tx_mtu().min(peer.rx_mtu.safe_cast());
        info!("link is up, sending up to {} bytes of payload per packet", self.tx_mtu);
    }

    fn on_data_packet(&mut self, packet: ReceivedPacket, fx: &mut Effects) {
        let header = packet.header;

        if self.reset.is_resetting() {
            debug!("dropping packet {:?} while resetting", header);
            return;
        }
        if header.flags.contains(PacketFlags::RESET) {
            warn!("reset flag on a packet without RESET attribute - dropping");
            return;
        }

        self.rx.register_packet(&header);

        match self.tx.register_ack(header.ack_seq) {
            AckOutcome::PacketAcked | AckOutcome::DatagramCompleted => {
                fx.cancel(TimerKind::TxTimeout);
                self.tx_timer_armed = false;
            }
            AckOutcome::NotAcked | AckOutcome::NothingOutstanding => {}
        }

        let error = header.packet_code.error;
        if error.requests_retransmission() {
            if self.tx.request_retransmission() {
                debug!("peer reported {:?} - retransmitting", error);
            }
        }
        else if error != ErrorCode::None {
            warn!("peer reported {:?}", error);
        }

        if packet.payload.is_empty() {
            return;
        }

        match self.rx.on_payload_packet(&header, &packet.payload) {
            RxOutcome::Buffered => self.schedule_ack(fx),
            RxOutcome::Delivered(datagram) => {
                fx.app_events.push(AppEvent::Datagram(datagram));
                self.schedule_ack(fx);
            }
            RxOutcome::Duplicate => self.tx.request_ack(true),
            RxOutcome::OutOfOrder => self.tx.set_error_to_send(ErrorCode::Order),
            RxOutcome::DatagramTooLarge => {
                self.tx.set_error_to_send(ErrorCode::Oom);
                self.tx.request_ack(true);
            }
        }
    }

    fn schedule_ack(&mut self, fx: &mut Effects) {
        if self.config.ack_delay.is_none() {
            self.tx.request_ack(true);
            return;
        }

        self.tx.request_ack(false);
        if !self.ack_timer_armed {
            fx.arm(TimerKind::AckDelay);
            self.ack_timer_armed = true;
        }
    }

    fn reset_sequence_state(&mut self, fx: &mut Effects) {
        self.rx.reset();
        self.tx.reset();
        fx.cancel(TimerKind::TxTimeout);
        self.tx_timer_armed = false;
        if self.ack_timer_armed {
            fx.cancel(TimerKind::AckDelay);
            self.ack_timer_armed = false;
        }
    }
}
