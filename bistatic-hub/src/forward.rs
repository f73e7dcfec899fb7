//! Tracker forwarding link: one outbound TCP connection that receives every
//! processed detection.
//!
//! Payloads are written exactly as published, with no added delimiter. While
//! the link is down, `forward` drops payloads; it never blocks the detection
//! path. A dropped connection is retried on a fixed delay, forever.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payloads buffered between the detection path and the socket writer.
const QUEUE_DEPTH: usize = 256;

#[derive(Clone)]
pub struct TrackerLink {
    tx: mpsc::Sender<String>,
    connected: Arc<AtomicBool>,
}

enum LinkEnd {
    /// Peer closed the connection.
    Closed,
    Failed(io::Error),
    /// Every `TrackerLink` handle was dropped.
    Shutdown,
}

impl TrackerLink {
    /// Start the connection task for `addr` (`host:port`).
    pub fn spawn(addr: String, reconnect_delay: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let connected = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(run(addr, reconnect_delay, rx, Arc::clone(&connected)));
        (TrackerLink { tx, connected }, handle)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queue `payload` for the tracker. Returns false if it was dropped.
    pub fn forward(&self, payload: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.tx.try_send(payload.to_owned()) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "tracker payload dropped");
                false
            }
        }
    }
}

async fn run(
    addr: String,
    reconnect_delay: Duration,
    mut rx: mpsc::Receiver<String>,
    connected: Arc<AtomicBool>,
) {
    loop {
        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                info!(%addr, "tracker link connected");
                connected.store(true, Ordering::Release);
                let end = pump(stream, &mut rx).await;
                connected.store(false, Ordering::Release);

                let mut discarded = 0usize;
                while rx.try_recv().is_ok() {
                    discarded += 1;
                }
                match end {
                    LinkEnd::Shutdown => return,
                    LinkEnd::Closed => warn!(%addr, discarded, "tracker link closed by peer"),
                    LinkEnd::Failed(e) => warn!(%addr, discarded, error = %e, "tracker link failed"),
                }
            }
            Err(e) => warn!(%addr, error = %e, "tracker link connect failed"),
        }

        if rx.is_closed() {
            return;
        }
        debug!(%addr, delay_ms = reconnect_delay.as_millis() as u64, "tracker link reconnecting");
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Write queued payloads until the connection ends. Inbound bytes are read
/// only to notice EOF and are discarded.
async fn pump(stream: TcpStream, rx: &mut mpsc::Receiver<String>) -> LinkEnd {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 512];
    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(payload) => {
                    if let Err(e) = writer.write_all(payload.as_bytes()).await {
                        return LinkEnd::Failed(e);
                    }
                }
                None => return LinkEnd::Shutdown,
            },
            read = reader.read(&mut scratch) => match read {
                Ok(0) => return LinkEnd::Closed,
                Ok(_) => {}
                Err(e) => return LinkEnd::Failed(e),
            },
        }
    }
}
