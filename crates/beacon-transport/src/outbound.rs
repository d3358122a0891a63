//! Per-connection outbound channel.
//!
//! Every live connection owns a bounded queue of outbound items. Producers
//! (fanout, heartbeats, error replies) hold an [`OutboundHandle`] and enqueue
//! without waiting; a single writer task drains the queue into the
//! connection's [`FrameSink`], so items reach the socket in the order they
//! were enqueued.
//!
//! The handle also carries the connection's cancellation token. Closing the
//! handle, or a failed socket write, cancels it. The close reason is kept
//! beside the token so the writer can use it even when the queue was too full
//! to take the close request.

use crate::traits::{ConnectionId, FrameSink, TransportError};
use beacon_protocol::{codec, CloseCode, CloseReason, Envelope, WireFormat};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Default outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 1024;

/// An item waiting to be written to a connection.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// An envelope (shared between recipients of the same fanout).
    Envelope(Arc<Envelope>),
    /// Close the connection after everything queued before it.
    Close(CloseReason),
}

impl Outbound {
    /// Borrow the envelope, if this item is one.
    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Outbound::Envelope(envelope) => Some(envelope),
            Outbound::Close(_) => None,
        }
    }
}

/// Sending side of a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
    connected_at: DateTime<Utc>,
}

impl OutboundHandle {
    /// The connection this handle writes to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// When the connection was opened.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Enqueue an envelope without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the connection is
    /// closed and [`TransportError::QueueFull`] if the recipient is not
    /// keeping up.
    pub fn send(&self, envelope: Arc<Envelope>) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }

        self.tx
            .try_send(Outbound::Envelope(envelope))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
            })
    }

    /// Request the connection to close.
    ///
    /// Items queued before the close are still written. Closing an already
    /// closed handle does nothing.
    pub fn close(&self, reason: impl Into<CloseReason>) {
        if self.closed.is_cancelled() {
            return;
        }

        let reason = reason.into();
        debug!(connection = %self.id, code = reason.code.code(), "Closing connection");
        self.close_reason.lock().get_or_insert_with(|| reason.clone());
        if self.tx.try_send(Outbound::Close(reason)).is_err() {
            trace!(connection = %self.id, "Close request not queued, writer closes on cancellation");
        }
        self.closed.cancel();
    }

    /// Check whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

/// Receiving side of a connection's outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    id: ConnectionId,
    rx: mpsc::Receiver<Outbound>,
    closed: CancellationToken,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
}

impl OutboundQueue {
    /// The connection this queue belongs to.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Wait for the next queued item.
    pub async fn next(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Take the next queued item, if any, without waiting.
    pub fn try_next(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// Take every envelope currently queued, skipping close requests.
    pub fn drain_envelopes(&mut self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        while let Some(item) = self.try_next() {
            if let Outbound::Envelope(envelope) = item {
                envelopes.push((*envelope).clone());
            }
        }
        envelopes
    }
}

/// Create an outbound queue for a new connection.
#[must_use]
pub fn channel(id: ConnectionId, capacity: usize) -> (OutboundHandle, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let closed = CancellationToken::new();
    let close_reason = Arc::new(Mutex::new(None));

    let handle = OutboundHandle {
        id: id.clone(),
        tx,
        closed: closed.clone(),
        close_reason: Arc::clone(&close_reason),
        connected_at: Utc::now(),
    };
    let queue = OutboundQueue {
        id,
        rx,
        closed,
        close_reason,
    };

    (handle, queue)
}

/// Spawn the writer task for a connection.
pub fn spawn_writer<S>(queue: OutboundQueue, sink: S, format: WireFormat) -> JoinHandle<()>
where
    S: FrameSink + 'static,
{
    tokio::spawn(run_writer(queue, sink, format))
}

/// Drain the outbound queue into the sink until the connection closes.
pub async fn run_writer<S: FrameSink>(mut queue: OutboundQueue, mut sink: S, format: WireFormat) {
    let closed = queue.closed.clone();

    loop {
        tokio::select! {
            biased;

            item = queue.rx.recv() => match item {
                Some(Outbound::Envelope(envelope)) => {
                    let frame = match codec::encode_frame(format, &envelope) {
                        Ok(frame) => frame,
                        Err(e) => {
                            error!(connection = %queue.id, error = %e, "Failed to encode envelope");
                            continue;
                        }
                    };
                    trace!(connection = %queue.id, kind = %envelope.kind(), "Writing envelope");
                    if let Err(e) = sink.send(frame).await {
                        debug!(connection = %queue.id, error = %e, "Write failed, closing");
                        break;
                    }
                }
                Some(Outbound::Close(reason)) => {
                    if let Err(e) = sink.close(reason).await {
                        debug!(connection = %queue.id, error = %e, "Close failed");
                    }
                    break;
                }
                None => {
                    let _ = sink.close(CloseReason::new(CloseCode::GoingAway)).await;
                    break;
                }
            },

            _ = closed.cancelled() => {
                let reason = queue
                    .close_reason
                    .lock()
                    .take()
                    .unwrap_or_else(|| CloseReason::new(CloseCode::GoingAway));
                let _ = sink.close(reason).await;
                break;
            }
        }
    }

    closed.cancel();
    debug!(connection = %queue.id, "Writer finished");
}
