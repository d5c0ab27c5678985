use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use bytes::{Bytes, BytesMut};
use tokio::select;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};
use tracing::{debug, info, span, trace, warn, Instrument, Level};
use uuid::Uuid;
use crate::config::TransportConfig;
use crate::error::LinkError;
use crate::link_adapter::{LinkAdapter, LinkSendResult};
use crate::timer::{TimerKind, WorkerTimers};
use crate::transport_listener::TransportListener;
use crate::transport_state::{AppEvent, Effects, TimerCommand, TransportState};

/// Everything that wakes up the worker. Link input and timer expiries never touch the transport
///  state directly, they are posted here and handled one at a time.
#[derive(Debug)]
pub enum WorkSignal {
    RxBytes(Bytes),
    SendDone(Result<(), LinkError>),
    TimerExpired { kind: TimerKind, generation: u64 },
    /// new datagrams or an error code are waiting to be sent
    WorkAvailable,
    Reset,
    Shutdown,
}

/// The transport state is only ever locked briefly and never across an `.await`. A poisoned lock
///  means a panic in protocol code that left no await point half done, so the state is used as is.
pub fn lock_state(state: &Mutex<TransportState>) -> MutexGuard<'_, TransportState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Worker {
    config: Arc<TransportConfig>,
    state: Arc<Mutex<TransportState>>,
    link: Arc<dyn LinkAdapter>,
    listener: Arc<dyn TransportListener>,
    signals_sender: UnboundedSender<WorkSignal>,
    signals: UnboundedReceiver<WorkSignal>,
    timers: WorkerTimers,
    packet_buf: BytesMut,
    /// set when shutdown was requested
    drain_deadline: Option<Instant>,
}

impl Worker {
    pub fn new(
        config: Arc<TransportConfig>,
        state: Arc<Mutex<TransportState>>,
        link: Arc<dyn LinkAdapter>,
        listener: Arc<dyn TransportListener>,
        signals_sender: UnboundedSender<WorkSignal>,
        signals: UnboundedReceiver<WorkSignal>,
    ) -> Worker {
        Worker {
            config,
            state,
            link,
            listener,
            signals_sender,
            signals,
            timers: WorkerTimers::new(),
            packet_buf: BytesMut::new(),
            drain_deadline: None,
        }
    }

    pub async fn run(mut self) {
        info!("transport worker started");

        let mut fx = Effects::default();
        lock_state(&self.state).start_reset(&mut fx);
        self.apply_effects(fx).await;
        self.do_send_work().await;

        loop {
            let signal = match self.drain_deadline {
                Some(deadline) => select! {
                    signal = self.signals.recv() => signal,
                    _ = time::sleep_until(deadline) => {
                        warn!("shutdown: drain timeout elapsed with {} datagrams pending", lock_state(&self.state).pending_datagrams());
                        break;
                    }
                },
                None => self.signals.recv().await,
            };

            let Some(signal) = signal else {
                debug!("all signal senders are gone");
                break;
            };

            self.on_signal(signal).await;
            self.do_send_work().await;

            if self.drain_deadline.is_some() && lock_state(&self.state).is_drained() {
                info!("shutdown: all datagrams were sent");
                break;
            }
        }

        self.timers.cancel_all();
        info!("transport worker stopped");
    }

    async fn on_signal(&mut self, signal: WorkSignal) {
        let mut fx = Effects::default();

        match signal {
            WorkSignal::RxBytes(bytes) => {
                let correlation_id = Uuid::new_v4();
                let span = span!(Level::TRACE, "rx_bytes", ?correlation_id);
                span.in_scope(|| {
                    trace!("received {} bytes from link", bytes.len());
                    lock_state(&self.state).on_rx_bytes(&bytes, &mut fx);
                });
                self.apply_effects(fx).instrument(span).await;
            }
            WorkSignal::SendDone(result) => {
                lock_state(&self.state).on_link_send_done(result);
            }
            WorkSignal::TimerExpired { kind, generation } => {
                if self.timers.get_mut(kind).on_expired(generation) {
                    trace!("{:?} timer expired", kind);
                    lock_state(&self.state).on_timer(kind, &mut fx);
                    self.apply_effects(fx).await;
                }
            }
            WorkSignal::WorkAvailable => {}
            WorkSignal::Reset => {
                lock_state(&self.state).start_reset(&mut fx);
                self.apply_effects(fx).await;
            }
            WorkSignal::Shutdown => {
                if self.drain_deadline.is_none() {
                    info!("shutdown requested, draining for up to {:?}", self.config.shutdown_drain_timeout);
                    self.drain_deadline = Some(Instant::now() + self.config.shutdown_drain_timeout);
                }
            }
        }
    }

    async fn apply_effects(&mut self, fx: Effects) {
        self.apply_timer_commands(&fx.timers);

        for event in fx.app_events {
            match event {
                AppEvent::Datagram(datagram) => {
                    trace!("dispatching datagram of {} bytes", datagram.len());
                    self.listener.on_datagram(datagram).await;
                }
                AppEvent::LinkReset => {
                    info!("link was reset");
                    self.listener.on_link_reset().await;
                }
            }
        }

        if let Some(consecutive_timeouts) = fx.tx_timeouts {
            if self.listener.on_tx_timeout(consecutive_timeouts).await {
                warn!("giving up after {} consecutive tx timeouts - resetting the link", consecutive_timeouts);

                let mut reset_fx = Effects::default();
                lock_state(&self.state).start_reset(&mut reset_fx);
                self.apply_timer_commands(&reset_fx.timers);
                if reset_fx.app_events.contains(&AppEvent::LinkReset) {
                    self.listener.on_link_reset().await;
                }
            }
        }
    }

    fn apply_timer_commands(&mut self, commands: &[TimerCommand]) {
        for command in commands {
            match *command {
                TimerCommand::Arm(kind) => {
                    if let Some(delay) = self.config.timer_delay(kind) {
                        self.timers.get_mut(kind).arm(delay, &self.signals_sender);
                    }
                }
                TimerCommand::Cancel(kind) => self.timers.get_mut(kind).cancel(),
            }
        }
    }

    /// Hands packets to the link until there is nothing left to send or the link is busy
    async fn do_send_work(&mut self) {
        loop {
            self.packet_buf.clear();
            let mut fx = Effects::default();
            if !lock_state(&self.state).next_packet(&mut self.packet_buf, &mut fx) {
                return;
            }
            self.apply_timer_commands(&fx.timers);

            match self.link.send(&self.packet_buf).await {
                LinkSendResult::Complete => {
                    lock_state(&self.state).on_link_send_done(Ok(()));
                }
                LinkSendResult::Pending => {
                    trace!("link send pending");
                    return;
                }
            }
        }
    }
}
