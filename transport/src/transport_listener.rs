use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;


/// The application's side of the transport. Callbacks are made from the transport's worker task,
///  one at a time and in the order the events occurred.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportListener: Send + Sync + 'static {
    async fn on_datagram(&self, datagram: Bytes);

    /// The link was reset while it was up. Datagrams that were in flight in either direction
    ///  may have been lost.
    async fn on_link_reset(&self);

    /// The outstanding packet was not acknowledged in time, `consecutive_timeouts` times in a
    ///  row. Returning true gives up and resets the link, false keeps retransmitting.
    async fn on_tx_timeout(&self, consecutive_timeouts: u32) -> bool;
}
