//! Test helpers: a synchronous simulation of two transport ends connected by a (possibly lossy)
//!  link, driven step by step without tokio.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use crate::config::TransportConfig;
use crate::timer::TimerKind;
use crate::transport_state::{AppEvent, Effects, TimerCommand, TransportState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSide {
    A,
    B,
}

pub struct SimulatedEnd {
    pub state: TransportState,
    pub delivered: Vec<Bytes>,
    pub resets: usize,
    pub armed: BTreeSet<TimerKind>,
    /// how often each timer was (re)started
    pub arm_counts: BTreeMap<TimerKind, usize>,
}
impl SimulatedEnd {
    fn new(config: TransportConfig) -> SimulatedEnd {
        SimulatedEnd {
            state: TransportState::new(Arc::new(config)),
            delivered: Vec::new(),
            resets: 0,
            armed: BTreeSet::new(),
            arm_counts: BTreeMap::new(),
        }
    }

    fn apply(&mut self, fx: &Effects) {
        for event in &fx.app_events {
            match event {
                AppEvent::Datagram(d) => self.delivered.push(d.clone()),
                AppEvent::LinkReset => self.resets += 1,
            }
        }
        for cmd in &fx.timers {
            match *cmd {
                TimerCommand::Arm(kind) => {
                    self.armed.insert(kind);
                    *self.arm_counts.entry(kind).or_default() += 1;
                }
                TimerCommand::Cancel(kind) => { self.armed.remove(&kind); }
            }
        }
    }
}

/// Decides if a packet sent by the given side arrives; it may modify the packet's bytes
pub type PacketFilter = Box<dyn FnMut(LinkSide, &mut Vec<u8>) -> bool>;

pub struct SimulatedLink {
    pub a: SimulatedEnd,
    pub b: SimulatedEnd,
    filter: PacketFilter,
}

impl SimulatedLink {
    pub fn new(config_a: TransportConfig, config_b: TransportConfig) -> SimulatedLink {
        SimulatedLink {
            a: SimulatedEnd::new(config_a),
            b: SimulatedEnd::new(config_b),
            filter: Box::new(|_, _| true),
        }
    }

    pub fn set_filter(&mut self, filter: PacketFilter) {
        self.filter = filter;
    }

    fn end(&mut self, side: LinkSide) -> &mut SimulatedEnd {
        match side {
            LinkSide::A => &mut self.a,
            LinkSide::B => &mut self.b,
        }
    }

    fn receiving_end(&mut self, from: LinkSide) -> &mut SimulatedEnd {
        match from {
            LinkSide::A => &mut self.b,
            LinkSide::B => &mut self.a,
        }
    }

    /// both sides start a reset as they do after booting, and the handshake runs to completion
    pub fn connect(&mut self) {
        self.start(LinkSide::A);
        self.start(LinkSide::B);
        self.run_until_idle();
    }

    pub fn start(&mut self, side: LinkSide) {
        self.reset(side);
    }

    pub fn reset(&mut self, side: LinkSide) {
        let end = self.end(side);
        let mut fx = Effects::default();
        end.state.start_reset(&mut fx);
        end.apply(&fx);
    }

    pub fn is_armed(&self, side: LinkSide, kind: TimerKind) -> bool {
        match side {
            LinkSide::A => self.a.armed.contains(&kind),
            LinkSide::B => self.b.armed.contains(&kind),
        }
    }

    pub fn arm_count(&self, side: LinkSide, kind: TimerKind) -> usize {
        let end = match side {
            LinkSide::A => &self.a,
            LinkSide::B => &self.b,
        };
        end.arm_counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn fire(&mut self, side: LinkSide, kind: TimerKind) -> Effects {
        let end = self.end(side);
        end.armed.remove(&kind);
        let mut fx = Effects::default();
        end.state.on_timer(kind, &mut fx);
        end.apply(&fx);
        fx
    }

    /// sends a single packet from the given side if it has one, returning true if it did
    fn send_one(&mut self, from: LinkSide) -> bool {
        let sender = self.end(from);

        let mut buf = BytesMut::new();
        let mut fx = Effects::default();
        if !sender.state.next_packet(&mut buf, &mut fx) {
            return false;
        }
        sender.apply(&fx);
        sender.state.on_link_send_done(Ok(()));

        let mut packet = buf.to_vec();
        if (self.filter)(from, &mut packet) {
            let receiver = self.receiving_end(from);
            let mut fx = Effects::default();
            receiver.state.on_rx_bytes(&packet, &mut fx);
            receiver.apply(&fx);
        }
        true
    }

    /// exchanges packets until neither side has anything left to send, without firing timers
    pub fn pump(&mut self) {
        self.pump_packets(usize::MAX);
    }

    /// like [SimulatedLink::pump], but stops after `max_packets`
    pub fn pump_packets(&mut self, max_packets: usize) {
        let mut num_sent = 0;
        loop {
            let mut progress = false;
            for side in [LinkSide::A, LinkSide::B] {
                if num_sent == max_packets {
                    return;
                }
                if self.send_one(side) {
                    num_sent += 1;
                    progress = true;
                }
            }
            if !progress {
                return;
            }
        }
    }

    /// pumps packets and fires armed timers (shortest timer kinds first) until the link is idle
    pub fn run_until_idle(&mut self) {
        const TIMER_ORDER: [TimerKind; 4] = [TimerKind::RxTimeout, TimerKind::AckDelay, TimerKind::ResetRetry, TimerKind::TxTimeout];

        for _ in 0..10_000 {
            self.pump();

            let next_timer = TIMER_ORDER.iter()
                .flat_map(|&kind| [(LinkSide::A, kind), (LinkSide::B, kind)])
                .find(|&(side, kind)| self.is_armed(side, kind));

            match next_timer {
                Some((side, kind)) => { self.fire(side, kind); }
                None => return,
            }
        }
        panic!("link did not become idle");
    }
}

/// A deterministic pseudo random sequence (xorshift) for reproducible corruption patterns
pub struct XorShift(pub u32);
impl XorShift {
    pub fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }
}
