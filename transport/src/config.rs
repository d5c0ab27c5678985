use std::time::Duration;
use anyhow::bail;
use crate::control_messages::{ProtocolVersion, TransportConfiguration};
use crate::packet::{max_payload_len, PACKET_OVERHEAD};
use crate::safe_converter::PrecheckedCast;
use crate::timer::TimerKind;

pub struct TransportConfig {
    /// This is the maximum number of bytes the link layer can transmit as a single packet,
    ///  including preamble, header and footer. The transport payload per packet is this value
    ///  minus the packet overhead of 14 bytes.
    ///
    /// The peer advertises its receive MTU during the reset handshake, and the effective
    ///  payload per packet is the smaller of the two.
    pub link_tx_mtu: usize,

    /// The maximum payload per packet this side accepts. Packets declaring a longer payload are
    ///  rejected as having an invalid header.
    pub rx_mtu: usize,

    /// The number of datagrams that can be queued for sending. Enqueueing fails immediately
    ///  (rather than blocking) when the queue is full.
    pub tx_datagram_queue_len: usize,

    /// Upper bound for a datagram's size, both for enqueueing and for reassembling incoming
    ///  datagrams
    pub max_datagram_size: usize,

    /// Time to wait for an ACK before re-sending a payload-bearing packet. This is advertised
    ///  to the peer in milliseconds, so it must fit into a u16.
    pub tx_timeout: Duration,

    /// Delay before sending an ACK-only packet, giving outgoing payload the chance to carry
    ///  the ACK instead. `None` sends ACKs immediately.
    pub ack_delay: Option<Duration>,

    /// Interval for re-sending a RESET packet that was not answered
    pub reset_retry_interval: Duration,

    /// A packet that stalls halfway through for this long is discarded, and the receiver goes
    ///  back to looking for a preamble. `None` waits indefinitely.
    pub rx_timeout: Option<Duration>,

    /// Maximum time that shutdown waits for queued datagrams to be sent and acknowledged
    pub shutdown_drain_timeout: Duration,
}

impl TransportConfig {
    /// This implementation supports a single unacknowledged packet at any given time
    pub const WINDOW_SIZE: u16 = 1;

    /// defaults for a UART style link with 1 KiB of payload per packet
    pub fn default_uart() -> TransportConfig {
        TransportConfig {
            link_tx_mtu: 1024 + PACKET_OVERHEAD,
            rx_mtu: 1024,
            tx_datagram_queue_len: 16,
            max_datagram_size: 64*1024,
            tx_timeout: Duration::from_millis(1000),
            ack_delay: None,
            reset_retry_interval: Duration::from_millis(1500),
            rx_timeout: Some(Duration::from_millis(100)),
            shutdown_drain_timeout: Duration::from_secs(2),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if max_payload_len(self.link_tx_mtu) == 0 {
            bail!("link MTU of {} leaves no room for payload", self.link_tx_mtu);
        }
        if max_payload_len(self.link_tx_mtu) > u16::MAX as usize {
            bail!("link MTU of {} exceeds the maximum packet length", self.link_tx_mtu);
        }
        if self.rx_mtu == 0 || self.rx_mtu > u16::MAX as usize {
            bail!("receive MTU must be between 1 and {}", u16::MAX);
        }
        // sequence numbers are u8, so the queue must stay well below their range
        if self.tx_datagram_queue_len == 0 || self.tx_datagram_queue_len > 127 {
            bail!("datagram queue length must be between 1 and 127, was {}", self.tx_datagram_queue_len);
        }
        if self.max_datagram_size == 0 {
            bail!("maximum datagram size must not be 0");
        }
        if self.tx_timeout.is_zero() || self.tx_timeout.as_millis() > u16::MAX as u128 {
            bail!("tx timeout must be between 1 and {} ms", u16::MAX);
        }
        if self.reset_retry_interval.is_zero() {
            bail!("reset retry interval must not be 0");
        }

        Ok(())
    }

    /// the maximum payload per packet this side sends before negotiating with the peer
    pub fn tx_mtu(&self) -> usize {
        max_payload_len(self.link_tx_mtu)
    }

    /// The link parameters advertised to the peer in RESET and RESET_ACK packets
    pub fn local_configuration(&self) -> TransportConfiguration {
        TransportConfiguration {
            version: ProtocolVersion::CURRENT,
            rx_mtu: self.rx_mtu.prechecked_cast(),
            window_size: Self::WINDOW_SIZE,
            timeout_ms: self.tx_timeout.as_millis().prechecked_cast(),
        }
    }

    pub fn timer_delay(&self, kind: TimerKind) -> Option<Duration> {
        match kind {
            TimerKind::TxTimeout => Some(self.tx_timeout),
            TimerKind::AckDelay => self.ack_delay,
            TimerKind::ResetRetry => Some(self.reset_retry_interval),
            TimerKind::RxTimeout => self.rx_timeout,
        }
    }
}
