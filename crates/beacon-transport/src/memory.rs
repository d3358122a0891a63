//! In-memory loopback transport.
//!
//! [`pair`] returns the server-side halves of a connection together with a
//! [`MemoryClient`] that plays the remote peer. Used by tests and by
//! embedding code that drives a session without a socket.

use crate::traits::{FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use beacon_protocol::{codec, CloseReason, Decoded, Envelope, WireFrame};
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

/// Event observed by the client side.
#[derive(Debug)]
enum ClientEvent {
    Frame(WireFrame),
    Closed(CloseReason),
}

/// Server-side receiving half.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<WireFrame>,
}

/// Server-side sending half.
#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<ClientEvent>,
    closed: bool,
}

/// The remote peer of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    tx: Option<mpsc::UnboundedSender<WireFrame>>,
    rx: mpsc::UnboundedReceiver<ClientEvent>,
    close_reason: Option<CloseReason>,
}

/// Create a connected in-memory transport.
#[must_use]
pub fn pair() -> (MemorySource, MemorySink, MemoryClient) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    (
        MemorySource { rx: inbound_rx },
        MemorySink {
            tx: outbound_tx,
            closed: false,
        },
        MemoryClient {
            tx: Some(inbound_tx),
            rx: outbound_rx,
            close_reason: None,
        },
    )
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(ClientEvent::Frame(frame))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.tx
            .send(ClientEvent::Closed(reason))
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

impl MemoryClient {
    /// Send an envelope as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be encoded or the server side
    /// is gone.
    pub fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let text = codec::encode_json(envelope)?;
        self.send_frame(WireFrame::Text(text))
    }

    /// Send raw text.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send_frame(WireFrame::Text(text.into()))
    }

    /// Send raw binary data.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.send_frame(WireFrame::Binary(data.into()))
    }

    fn send_frame(&self, frame: WireFrame) -> Result<(), TransportError> {
        match &self.tx {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    /// Close the client side; the server sees a clean end of stream.
    pub fn close(&mut self) {
        self.tx = None;
    }

    /// Wait for the next envelope from the server.
    ///
    /// Returns `None` once the server closed the connection or went away.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await? {
                ClientEvent::Frame(frame) => {
                    if let Ok(Decoded::Envelope(envelope)) = codec::decode_frame(&frame) {
                        return Some(envelope);
                    }
                }
                ClientEvent::Closed(reason) => {
                    self.close_reason = Some(reason);
                    return None;
                }
            }
        }
    }

    /// Wait for the next envelope, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Envelope> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    /// Take the next envelope if one is already available.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv().ok()? {
                ClientEvent::Frame(frame) => {
                    if let Ok(Decoded::Envelope(envelope)) = codec::decode_frame(&frame) {
                        return Some(envelope);
                    }
                }
                ClientEvent::Closed(reason) => {
                    self.close_reason = Some(reason);
                    return None;
                }
            }
        }
    }

    /// The close reason sent by the server, once observed.
    #[must_use]
    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::CloseCode;

    #[tokio::test]
    async fn test_client_to_server() {
        let (mut source, _sink, mut client) = pair();

        client.send(&Envelope::Heartbeat).unwrap();
        let frame = source.recv().await.unwrap().unwrap();
        assert_eq!(frame, WireFrame::Text(r#"{"type":"heartbeat"}"#.to_string()));

        client.close();
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_server_to_client() {
        let (_source, mut sink, mut client) = pair();

        let envelope = Envelope::broadcast("hi");
        let frame = codec::encode_frame(Default::default(), &envelope).unwrap();
        sink.send(frame).await.unwrap();
        sink.close(CloseReason::new(CloseCode::Normal)).await.unwrap();

        assert_eq!(client.recv().await, Some(envelope));
        assert_eq!(client.recv().await, None);
        assert_eq!(client.close_reason().map(|r| r.code), Some(CloseCode::Normal));
        assert!(sink.send(WireFrame::Text("{}".into())).await.is_err());
    }
}
