use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use crate::end_point::LinkHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSendResult {
    /// the packet was handed off, and the transport may send the next one
    Complete,
    /// the link is still busy with the packet; it reports completion through
    ///  [LinkHandle::on_send_done]
    Pending,
}

/// This is an abstraction for putting a complete packet on the physical link (e.g. a UART),
///  introduced to facilitate mocking the I/O part away for testing.
///
/// The transport never calls `send` again before the previous send completed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LinkAdapter: Send + Sync + 'static {
    async fn send(&self, packet: &[u8]) -> LinkSendResult;
}

/// A link over a byte stream, e.g. a serial port. Writes complete before `send` returns.
pub struct StreamLink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> StreamLink<W> {
    pub fn new(writer: W) -> StreamLink<W> {
        StreamLink { writer: Mutex::new(writer) }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send + 'static> LinkAdapter for StreamLink<W> {
    async fn send(&self, packet: &[u8]) -> LinkSendResult {
        trace!("stream link: writing {} bytes", packet.len());

        // A failed write is not reported: the packet is lost, and the transport's retransmission
        //  takes care of it
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.write_all(packet).await {
            error!("error writing packet to link: {}", e);
        }
        else if let Err(e) = writer.flush().await {
            error!("error flushing link: {}", e);
        }
        LinkSendResult::Complete
    }
}

/// Reads from the link's receive side and hands everything to the transport until the reader is
///  closed or fails.
pub fn spawn_stream_reader<R: AsyncRead + Unpin + Send + 'static>(mut reader: R, link_handle: LinkHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("link closed");
                    break;
                }
                Ok(n) => {
                    trace!("read {} bytes from link", n);
                    if !link_handle.on_bytes_received(&buf[..n]) {
                        debug!("transport stopped - terminating link reader");
                        break;
                    }
                }
                Err(e) => {
                    error!("error reading from link: {}", e);
                    break;
                }
            }
        }
    })
}
