//! Errors surfaced to the application. Internal failures (corrupted packets, protocol violations
//!  by the peer) are handled inside the transport and logged, they never reach the caller.

use bytes::Bytes;
use thiserror::Error;

/// A datagram could not be enqueued for sending. Variants carrying the datagram hand it back to
///  the caller, so ownership is never lost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    /// All queue slots are taken; the caller may retry after datagrams were acknowledged
    #[error("datagram queue is full")]
    QueueFull(Bytes),

    #[error("datagram of {} bytes exceeds the maximum datagram size of {max}", .datagram.len())]
    TooLarge { datagram: Bytes, max: usize },

    /// Zero-length datagrams cannot be told apart from ACK-only packets on the wire
    #[error("datagram is empty")]
    Empty,

    #[error("transport is shutting down")]
    ShuttingDown(Bytes),
}

impl EnqueueError {
    pub fn into_datagram(self) -> Option<Bytes> {
        match self {
            EnqueueError::QueueFull(datagram) => Some(datagram),
            EnqueueError::TooLarge { datagram, .. } => Some(datagram),
            EnqueueError::Empty => None,
            EnqueueError::ShuttingDown(datagram) => Some(datagram),
        }
    }
}

/// Reported by the link when an asynchronous send failed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("link write failed: {0}")]
    WriteFailed(String),
    #[error("link closed")]
    Closed,
}
