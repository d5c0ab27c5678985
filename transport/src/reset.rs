use bytes::BytesMut;
use tracing::{debug, info, warn};
use crate::control_messages::TransportConfiguration;
use crate::packet::encode_packet;
use crate::packet_header::{ErrorCode, PacketAttr, PacketCode, PacketFlags, PacketHeader};
use crate::safe_converter::PrecheckedCast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetState {
    /// waiting for the reset handshake to complete: only RESET and RESET_ACK packets are exchanged
    Resetting,
    /// the link is up
    None,
}

/// Tracks the reset handshake. A RESET is answered with a RESET_ACK, and both carry the sending
///  side's [TransportConfiguration]. The side that sent the RESET is done when the RESET_ACK
///  arrives, the other side as soon as it sent the RESET_ACK.
pub struct ResetHandshake {
    state: ResetState,
    local: TransportConfiguration,
    peer: Option<TransportConfiguration>,
    /// a control packet waiting to be sent
    pending: Option<PacketAttr>,
    /// a RESET was sent and not answered yet
    awaiting_ack: bool,
}

impl ResetHandshake {
    pub fn new(local: TransportConfiguration) -> ResetHandshake {
        ResetHandshake {
            state: ResetState::Resetting,
            local,
            peer: None,
            pending: None,
            awaiting_ack: false,
        }
    }

    pub fn state(&self) -> ResetState {
        self.state
    }

    pub fn is_resetting(&self) -> bool {
        self.state == ResetState::Resetting
    }

    pub fn local_configuration(&self) -> &TransportConfiguration {
        &self.local
    }

    pub fn peer_configuration(&self) -> Option<&TransportConfiguration> {
        self.peer.as_ref()
    }

    pub fn has_pending_packet(&self) -> bool {
        self.pending.is_some()
    }

    /// Starts a reset from this side, returning the state before
    pub fn initiate(&mut self) -> ResetState {
        let previous = self.state;
        info!("initiating link reset");
        self.state = ResetState::Resetting;
        self.pending = Some(PacketAttr::Reset);
        self.awaiting_ack = false;
        previous
    }

    /// The peer (re)started the handshake: this side answers and considers the link up. This
    ///  applies to a RESET crossing our own RESET as well.
    pub fn on_reset_received(&mut self, peer: TransportConfiguration) -> ResetState {
        let previous = self.state;
        info!("received RESET from peer with {:?}", peer);
        self.peer = Some(peer);
        self.state = ResetState::None;
        self.pending = Some(PacketAttr::ResetAck);
        self.awaiting_ack = false;
        previous
    }

    /// Returns true if the RESET_ACK completed a handshake started by this side
    pub fn on_reset_ack_received(&mut self, peer: TransportConfiguration) -> bool {
        if !self.is_resetting() || self.pending.is_some() {
            warn!("received unexpected RESET_ACK - ignoring");
            return false;
        }

        info!("link reset complete, peer configuration {:?}", peer);
        self.peer = Some(peer);
        self.state = ResetState::None;
        self.awaiting_ack = false;
        true
    }

    /// Returns true if the RESET is re-sent
    pub fn on_retry_timer(&mut self) -> bool {
        if !self.is_resetting() || !self.awaiting_ack {
            return false;
        }
        debug!("RESET was not answered - retrying");
        self.pending = Some(PacketAttr::Reset);
        self.awaiting_ack = false;
        true
    }

    /// Writes the pending control packet to `buf`, returning its attribute
    pub fn next_packet(&mut self, buf: &mut BytesMut) -> Option<PacketAttr> {
        let attr = self.pending.take()?;
        if attr == PacketAttr::Reset {
            self.awaiting_ack = true;
        }

        let flags = if attr == PacketAttr::Reset {
            PacketFlags::RESET
        }
        else {
            PacketFlags::empty()
        };

        let mut payload = Vec::with_capacity(TransportConfiguration::SERIALIZED_LEN);
        self.local.ser(&mut payload);

        let header = PacketHeader {
            flags,
            packet_code: PacketCode::new(attr, ErrorCode::None),
            ack_seq: 0,
            seq: 0,
            length: payload.len().prechecked_cast(),
        };
        encode_packet(&header, &payload, buf);
        debug!("sending {:?}", attr);
        Some(attr)
    }
}
