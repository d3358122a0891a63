//! Inbound event dispatcher.
//!
//! One dispatcher runs per connection. It reads frames from the
//! connection's source, classifies them and hands them to persistence or
//! the fanout router. Errors are reported to the sending connection only
//! and never end the loop.

use crate::hub::Hub;
use crate::router::RouteError;
use crate::store::{MessageId, StoreError};
use beacon_protocol::{
    codec, DeliveryStatus, Decoded, Envelope, ErrorKind, MessageStatusUpdate, ProtocolError,
    WireFrame,
};
use beacon_transport::{FrameSource, OutboundHandle};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Validation failures reported to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid message content")]
    MissingContent,

    #[error("Message too long (max {max} characters)")]
    TooLong { max: usize },

    #[error("Frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Missing message type")]
    MissingType,

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

impl From<ProtocolError> for ValidationError {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::MissingType => ValidationError::MissingType,
            other => ValidationError::Malformed(other.to_string()),
        }
    }
}

/// Check chat content: a non-empty string of at most `max` characters.
///
/// # Errors
///
/// Returns the validation failure to report to the sender.
pub fn validate_content(content: Option<&str>, max: usize) -> Result<(), ValidationError> {
    match content {
        None | Some("") => Err(ValidationError::MissingContent),
        Some(text) if text.chars().count() > max => Err(ValidationError::TooLong { max }),
        Some(_) => Ok(()),
    }
}

/// Failures while handling one inbound envelope.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// The error envelope sent to the sender.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        match self {
            DispatchError::Validation(e) => Envelope::error(ErrorKind::Validation, e.to_string()),
            DispatchError::Route(e) => e.to_envelope(),
            DispatchError::MessageNotFound(_) => Envelope::error(ErrorKind::NotFound, self.to_string()),
            DispatchError::Store(_) => Envelope::error(ErrorKind::Internal, "Failed to process message"),
        }
    }
}

/// How a session's receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the connection.
    Closed,
    /// The session was cancelled (superseded, logged out, demoted, or the
    /// writer failed).
    Cancelled,
    /// Reading from the connection failed.
    Failed(String),
}

/// Receive loop for one connection.
pub struct Dispatcher<'a> {
    hub: &'a Hub,
    identity: &'a str,
    handle: OutboundHandle,
}

impl<'a> Dispatcher<'a> {
    #[must_use]
    pub fn new(hub: &'a Hub, identity: &'a str, handle: OutboundHandle) -> Self {
        Self {
            hub,
            identity,
            handle,
        }
    }

    /// Process frames until the connection closes or `cancel` fires.
    pub async fn run<S: FrameSource>(&self, mut source: S, cancel: CancellationToken) -> SessionEnd {
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return SessionEnd::Cancelled,

                frame = source.recv() => match frame {
                    Ok(Some(frame)) => self.handle_frame(frame).await,
                    Ok(None) => return SessionEnd::Closed,
                    Err(e) => {
                        debug!(identity = %self.identity, error = %e, "Receive failed");
                        return SessionEnd::Failed(e.to_string());
                    }
                },
            }
        }
    }

    /// Handle one frame, replying with an error envelope on failure.
    pub async fn handle_frame(&self, frame: WireFrame) {
        if let Err(e) = self.process_frame(frame).await {
            match &e {
                DispatchError::Store(_) => {
                    error!(identity = %self.identity, error = %e, "Failed to process message");
                }
                _ => warn!(identity = %self.identity, error = %e, "Rejected inbound frame"),
            }
            self.reply(e.to_envelope());
        }
    }

    async fn process_frame(&self, frame: WireFrame) -> Result<(), DispatchError> {
        let max = self.hub.config().max_frame_bytes;
        if frame.len() > max {
            return Err(ValidationError::FrameTooLarge {
                size: frame.len(),
                max,
            }
            .into());
        }

        let decoded = codec::decode_frame(&frame).map_err(ValidationError::from)?;
        self.touch().await;

        match decoded {
            Decoded::Envelope(envelope) => self.handle_envelope(envelope).await,
            Decoded::Unknown(tag) => {
                debug!(identity = %self.identity, tag = %tag, "Ignoring unknown envelope type");
                Ok(())
            }
        }
    }

    /// Handle one decoded envelope.
    ///
    /// # Errors
    ///
    /// Returns the failure to report to the sender.
    pub async fn handle_envelope(&self, envelope: Envelope) -> Result<(), DispatchError> {
        trace!(identity = %self.identity, kind = %envelope.kind(), "Inbound envelope");

        match envelope {
            // Activity is recorded for every decoded frame before dispatch.
            Envelope::Heartbeat => Ok(()),
            Envelope::MessageStatus(update) => self.handle_message_status(update).await,
            Envelope::DirectMessage(_) | Envelope::GroupMessage(_) | Envelope::Broadcast(_) => {
                let content = envelope.as_chat().and_then(|m| m.content.as_deref());
                validate_content(content, self.hub.config().max_content_chars)?;

                let store = self.hub.stores().open().await?;
                self.hub
                    .router()
                    .route(store.as_ref(), self.identity, envelope)
                    .await?;
                Ok(())
            }
            Envelope::Status(_)
            | Envelope::ChatPreviewUpdate(_)
            | Envelope::NoticePost(_)
            | Envelope::Error(_) => {
                debug!(
                    identity = %self.identity,
                    kind = %envelope.kind(),
                    "Ignoring server-only envelope from client"
                );
                Ok(())
            }
        }
    }

    async fn handle_message_status(&self, update: MessageStatusUpdate) -> Result<(), DispatchError> {
        let store = self.hub.stores().open().await?;
        let message = store
            .find_message(update.message_id)
            .await?
            .ok_or(DispatchError::MessageNotFound(update.message_id))?;

        if update.status == DeliveryStatus::Seen {
            store.mark_read(message.id).await?;
        }

        self.hub
            .router()
            .send_to(&message.sender, Envelope::MessageStatus(update));
        Ok(())
    }

    /// Refresh the sender's last-active time. Any decoded frame counts as
    /// activity; a failed refresh is logged and the frame is still handled.
    async fn touch(&self) {
        let result = match self.hub.stores().open().await {
            Ok(store) => store.touch(self.identity, Utc::now()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(identity = %self.identity, error = %e, "Failed to refresh last_active");
        }
    }

    fn reply(&self, envelope: Envelope) {
        if let Err(e) = self.handle.send(Arc::new(envelope)) {
            debug!(identity = %self.identity, error = %e, "Could not deliver error reply");
        }
    }
}
