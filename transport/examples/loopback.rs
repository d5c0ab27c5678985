use std::sync::Arc;
use std::time::{Duration, SystemTime};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{info, Level};
use sensorhub_transport::{spawn_stream_reader, StreamLink, TransportConfig, TransportEndPoint, TransportListener};

struct PrintingListener {
    name: &'static str,
    received: UnboundedSender<Bytes>,
}

#[async_trait]
impl TransportListener for PrintingListener {
    async fn on_datagram(&self, datagram: Bytes) {
        info!("{}: received datagram of {} bytes", self.name, datagram.len());
        let _ = self.received.send(datagram);
    }

    async fn on_link_reset(&self) {
        info!("{}: link was reset", self.name);
    }

    async fn on_tx_timeout(&self, consecutive_timeouts: u32) -> bool {
        consecutive_timeouts >= 5
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

fn create_end_point(name: &'static str, stream: io::DuplexStream, received: UnboundedSender<Bytes>) -> TransportEndPoint {
    let (read, write) = io::split(stream);
    let config = Arc::new(TransportConfig {
        link_tx_mtu: 64,
        rx_mtu: 50,
        ..TransportConfig::default_uart()
    });

    let end_point = TransportEndPoint::new(
        config,
        Arc::new(StreamLink::new(write)),
        Arc::new(PrintingListener { name, received }),
    ).unwrap();
    spawn_stream_reader(read, end_point.link_handle());
    end_point
}

/// Two transport end points talking over an in-memory byte stream, standing in for a UART
#[tokio::main]
pub async fn main() {
    init_logging();

    let (hub_stream, host_stream) = io::duplex(1024);
    let (hub_sender, _hub_received) = mpsc::unbounded_channel();
    let (host_sender, mut host_received) = mpsc::unbounded_channel();

    let hub = create_end_point("hub", hub_stream, hub_sender);
    let host = create_end_point("host", host_stream, host_sender);

    let start = SystemTime::now();

    for i in 0u8..10 {
        let datagram = vec![i; 20 * (i as usize + 1)];
        while let Err(e) = hub.enqueue_datagram(datagram.clone()) {
            info!("hub: {} - retrying", e);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    for _ in 0..10 {
        if host_received.recv().await.is_none() {
            break;
        }
    }

    hub.shutdown().await;
    host.shutdown().await;

    let duration = SystemTime::elapsed(&start).unwrap();
    println!("duration: {:?}", duration)
}
