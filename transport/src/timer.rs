use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;
use crate::worker::WorkSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// waiting for the ACK of the outstanding payload packet
    TxTimeout,
    /// coalescing an ACK with outgoing payload
    AckDelay,
    /// waiting for the RESET_ACK
    ResetRetry,
    /// waiting for the rest of a partially received packet
    RxTimeout,
}

/// A restartable one-shot timer that signals its expiry to the worker loop. Every arming gets a
///  new generation so that an expiry signal that was already queued when the timer was
///  re-armed or cancelled can be recognized as stale.
pub struct WorkerTimer {
    kind: TimerKind,
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl Drop for WorkerTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl WorkerTimer {
    pub fn new(kind: TimerKind) -> WorkerTimer {
        WorkerTimer {
            kind,
            generation: 0,
            handle: None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.handle.is_some()
    }

    pub fn arm(&mut self, delay: Duration, signals: &UnboundedSender<WorkSignal>) {
        self.cancel();

        let kind = self.kind;
        let generation = self.generation;
        let signals = signals.clone();
        trace!("arming {:?} timer for {:?}", kind, delay);
        self.handle = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            // the worker is gone if sending fails, and there is no one left to care
            let _ = signals.send(WorkSignal::TimerExpired { kind, generation });
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Returns true if the expiry belongs to the current arming, disarming the timer
    pub fn on_expired(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.handle.is_none() {
            trace!("ignoring stale {:?} timer expiry", self.kind);
            return false;
        }
        self.handle = None;
        self.generation += 1;
        true
    }
}

/// One timer per kind
pub struct WorkerTimers {
    tx_timeout: WorkerTimer,
    ack_delay: WorkerTimer,
    reset_retry: WorkerTimer,
    rx_timeout: WorkerTimer,
}

impl WorkerTimers {
    pub fn new() -> WorkerTimers {
        WorkerTimers {
            tx_timeout: WorkerTimer::new(TimerKind::TxTimeout),
            ack_delay: WorkerTimer::new(TimerKind::AckDelay),
            reset_retry: WorkerTimer::new(TimerKind::ResetRetry),
            rx_timeout: WorkerTimer::new(TimerKind::RxTimeout),
        }
    }

    pub fn get_mut(&mut self, kind: TimerKind) -> &mut WorkerTimer {
        match kind {
            TimerKind::TxTimeout => &mut self.tx_timeout,
            TimerKind::AckDelay => &mut self.ack_delay,
            TimerKind::ResetRetry => &mut self.reset_retry,
            TimerKind::RxTimeout => &mut self.rx_timeout,
        }
    }

    pub fn cancel_all(&mut self) {
        self.tx_timeout.cancel();
        self.ack_delay.cancel();
        self.reset_retry.cancel();
        self.rx_timeout.cancel();
    }
}
