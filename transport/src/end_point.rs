use std::sync::{Arc, Mutex};
use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use crate::config::TransportConfig;
use crate::error::{EnqueueError, LinkError};
use crate::link_adapter::LinkAdapter;
use crate::packet_header::ErrorCode;
use crate::reset::ResetState;
use crate::transport_listener::TransportListener;
use crate::transport_state::TransportState;
use crate::worker::{lock_state, WorkSignal, Worker};

/// The link's way back into the transport: received bytes and completions of pending sends.
///  Calls never block and never touch protocol state on the caller's context; they are handed to
///  the transport's worker task.
#[derive(Clone)]
pub struct LinkHandle {
    signals: UnboundedSender<WorkSignal>,
}

impl LinkHandle {
    /// Returns false if the transport is not running any more
    pub fn on_bytes_received(&self, bytes: &[u8]) -> bool {
        if self.signals.send(WorkSignal::RxBytes(Bytes::copy_from_slice(bytes))).is_err() {
            debug!("transport stopped - dropping {} received bytes", bytes.len());
            return false;
        }
        true
    }

    /// Completes a send for which the link adapter returned [crate::link_adapter::LinkSendResult::Pending]
    pub fn on_send_done(&self, result: Result<(), LinkError>) {
        if self.signals.send(WorkSignal::SendDone(result)).is_err() {
            debug!("transport stopped - ignoring send completion");
        }
    }
}

/// TransportEndPoint is where all parts of the protocol come together: it owns the worker task
///  that talks to the link, and it has the API for application code to send datagrams.
///
/// The link starts out with a reset handshake. Datagrams enqueued before the link is up are sent
///  once the handshake completed.
pub struct TransportEndPoint {
    state: Arc<Mutex<TransportState>>,
    signals: UnboundedSender<WorkSignal>,
    worker_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for TransportEndPoint {
    fn drop(&mut self) {
        if let Some(handle) = self.take_worker_handle() {
            handle.abort();
        }
    }
}

impl TransportEndPoint {
    /// Starts the transport's worker task, so this must be called from inside a tokio runtime
    pub fn new(
        config: Arc<TransportConfig>,
        link: Arc<dyn LinkAdapter>,
        listener: Arc<dyn TransportListener>,
    ) -> anyhow::Result<TransportEndPoint> {
        config.validate()?;

        let state = Arc::new(Mutex::new(TransportState::new(config.clone())));
        let (signals_sender, signals) = mpsc::unbounded_channel();

        let worker = Worker::new(config.clone(), state.clone(), link, listener, signals_sender.clone(), signals);
        let worker_handle = tokio::spawn(worker.run());
        info!("started transport with {} bytes of payload per packet", config.tx_mtu());

        Ok(TransportEndPoint {
            state,
            signals: signals_sender,
            worker_handle: Mutex::new(Some(worker_handle)),
        })
    }

    pub fn link_handle(&self) -> LinkHandle {
        LinkHandle {
            signals: self.signals.clone(),
        }
    }

    /// Queues a datagram for sending. This never waits: if the datagram can not be queued, it is
    ///  handed back in the error.
    pub fn enqueue_datagram(&self, datagram: impl Into<Bytes>) -> Result<(), EnqueueError> {
        lock_state(&self.state).enqueue_datagram(datagram.into())?;
        self.notify_worker(WorkSignal::WorkAvailable);
        Ok(())
    }

    /// Reports an error to the peer (e.g. [ErrorCode::AppLayer]) with the next outgoing packet
    pub fn enqueue_error_datagram(&self, code: ErrorCode) {
        lock_state(&self.state).enqueue_error(code);
        self.notify_worker(WorkSignal::WorkAvailable);
    }

    pub fn trigger_reset(&self) {
        self.notify_worker(WorkSignal::Reset);
    }

    pub fn reset_state(&self) -> ResetState {
        lock_state(&self.state).reset_state()
    }

    pub fn pending_datagrams(&self) -> usize {
        lock_state(&self.state).pending_datagrams()
    }

    /// Stops accepting datagrams and waits until the queued datagrams were acknowledged by the
    ///  peer, or until the configured drain timeout elapsed.
    pub async fn shutdown(&self) {
        lock_state(&self.state).stop_accepting();
        self.notify_worker(WorkSignal::Shutdown);

        if let Some(handle) = self.take_worker_handle() {
            if let Err(e) = handle.await {
                warn!("transport worker terminated abnormally: {}", e);
            }
        }
    }

    fn take_worker_handle(&self) -> Option<JoinHandle<()>> {
        match self.worker_handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn notify_worker(&self, signal: WorkSignal) {
        if self.signals.send(signal).is_err() {
            debug!("transport worker is not running");
        }
    }
}
