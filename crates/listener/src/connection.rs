//! Per-connection handling.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, info, warn};

use relay_core::error::FrameErrorCode;
use relay_core::limits::READ_CHUNK_SIZE;
use relay_core::{Error, EventFramer};
use spool::AppendLog;
use telemetry::metrics;

use crate::rate_limit::RateLimiter;

/// An admitted connection's claim on the pool.
///
/// Holds the semaphore permit and one unit of the live-connection count.
/// Both are returned when the slot drops, whichever way the handler exits.
pub struct ConnectionSlot {
    _permit: OwnedSemaphorePermit,
    live: Arc<AtomicUsize>,
    peer: SocketAddr,
}

impl ConnectionSlot {
    pub fn new(permit: OwnedSemaphorePermit, live: Arc<AtomicUsize>, peer: SocketAddr) -> Self {
        live.fetch_add(1, Ordering::AcqRel);
        metrics().active_connections.inc();
        Self {
            _permit: permit,
            live,
            peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let remaining = self.live.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics().active_connections.dec();
        debug!(peer = %self.peer, live = remaining, "Connection slot released");
    }
}

/// Why a handler stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Idle,
    TooLarge,
    Malformed,
    ReadError,
    AppendFailed,
}

pub(crate) struct ConnectionHandler {
    pub(crate) log: Arc<AppendLog>,
    pub(crate) rate_limiter: Arc<RateLimiter>,
    pub(crate) max_message_size: usize,
    pub(crate) read_timeout: Duration,
}

impl ConnectionHandler {
    /// Reads until the peer goes away, appending every complete record.
    ///
    /// The slot is moved in so that it is released exactly when this
    /// returns.
    pub(crate) async fn handle(self, mut stream: TcpStream, slot: ConnectionSlot) -> CloseReason {
        let peer = slot.peer();
        let mut framer = EventFramer::new();
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut received: usize = 0;
        let mut appended: u64 = 0;

        let reason = loop {
            let n = match tokio::time::timeout(self.read_timeout, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => break CloseReason::PeerClosed,
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    debug!(peer = %peer, error = %e, "Read error");
                    break CloseReason::ReadError;
                }
                Err(_) => {
                    debug!(peer = %peer, timeout_secs = self.read_timeout.as_secs(), "Connection idle, closing");
                    break CloseReason::Idle;
                }
            };

            received += n;
            metrics().bytes_received.inc_by(n as u64);

            if received > self.max_message_size {
                let err = Error::frame(
                    FrameErrorCode::MessageTooLarge,
                    format!("{received} bytes received, limit {}", self.max_message_size),
                );
                metrics().oversize_disconnects.inc();
                warn!(peer = %peer, error = %err, "Closing connection");
                break CloseReason::TooLarge;
            }

            framer.push(&chunk[..n]);

            match self.append_ready(&mut framer, peer, &mut appended).await {
                Ok(()) => {}
                Err(reason) => break reason,
            }
        };

        if framer.buffered() > 0 {
            debug!(peer = %peer, bytes = framer.buffered(), "Discarding incomplete record at close");
        }
        info!(peer = %peer, records = appended, bytes = received, reason = ?reason, "Connection closed");

        drop(slot);
        reason
    }

    async fn append_ready(
        &self,
        framer: &mut EventFramer,
        peer: SocketAddr,
        appended: &mut u64,
    ) -> Result<(), CloseReason> {
        loop {
            // Records come out of the framer with their declaration removed.
            let body: Bytes = match framer.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Closing connection");
                    return Err(CloseReason::Malformed);
                }
            };

            match self.log.append(&body).await {
                Ok(total) => {
                    *appended += 1;
                    metrics().records_appended.inc();
                    self.rate_limiter.record(peer.ip(), Instant::now());
                    debug!(peer = %peer, bytes = body.len(), session_total = total, "Record appended");
                }
                Err(e) => {
                    metrics().append_errors.inc();
                    warn!(peer = %peer, error = %e, "Append failed, closing connection");
                    return Err(CloseReason::AppendFailed);
                }
            }
        }
    }
}
