//! Message fanout router.
//!
//! Resolves the recipients of direct, group, broadcast and multicast
//! envelopes and enqueues them on the recipients' live channels. Delivery is
//! best-effort: a failing channel is counted and logged, never fatal.

use crate::registry::ConnectionRegistry;
use crate::store::{MessageId, MessageTarget, NewMessage, Store, StoreError};
use beacon_protocol::{ChatMessage, ChatPreview, Envelope, EnvelopeKind, ErrorKind};
use beacon_transport::TransportError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Enqueued on the recipient's channel.
    Delivered,
    /// The recipient has no live channel.
    NotConnected,
    /// The recipient's channel is full or closed.
    Failed,
}

/// Delivery errors.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The recipient has no live channel.
    #[error("{0} is not connected")]
    NotConnected(String),

    /// The channel rejected the envelope.
    #[error("Delivery to {identity} failed: {source}")]
    Transport {
        identity: String,
        #[source]
        source: TransportError,
    },
}

impl From<&DeliveryError> for Delivery {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::NotConnected(_) => Delivery::NotConnected,
            DeliveryError::Transport { .. } => Delivery::Failed,
        }
    }
}

/// Per-fanout delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: usize,
    pub not_connected: usize,
    pub failed: usize,
}

impl FanoutReport {
    /// Count one delivery outcome.
    pub fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::NotConnected => self.not_connected += 1,
            Delivery::Failed => self.failed += 1,
        }
    }

    /// Total recipients attempted.
    #[must_use]
    pub fn attempted(&self) -> usize {
        self.delivered + self.not_connected + self.failed
    }
}

/// Routing errors reported back to the sender.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("User '{0}' not found")]
    RecipientNotFound(String),

    #[error("Group '{0}' not found")]
    GroupNotFound(String),

    #[error("Direct message requires a recipient")]
    MissingRecipient,

    #[error("Group message requires a group")]
    MissingGroup,

    #[error("Cannot route {0} envelopes")]
    Unsupported(EnvelopeKind),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RouteError {
    /// The error envelope sent to the sender.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        match self {
            RouteError::RecipientNotFound(_) | RouteError::GroupNotFound(_) => {
                Envelope::error(ErrorKind::NotFound, self.to_string())
            }
            RouteError::MissingRecipient | RouteError::MissingGroup | RouteError::Unsupported(_) => {
                Envelope::error(ErrorKind::Validation, self.to_string())
            }
            RouteError::Store(_) => Envelope::error(ErrorKind::Internal, "Failed to process message"),
        }
    }
}

/// Result of routing a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOutcome {
    pub message_id: MessageId,
    pub report: FanoutReport,
}

/// Delivers envelopes through the connection registry.
#[derive(Debug, Clone)]
pub struct FanoutRouter {
    registry: Arc<ConnectionRegistry>,
}

impl FanoutRouter {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Enqueue an envelope on an identity's channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is not connected or its channel
    /// rejects the envelope.
    pub fn try_deliver(&self, identity: &str, envelope: Arc<Envelope>) -> Result<(), DeliveryError> {
        let handle = self
            .registry
            .lookup(identity)
            .ok_or_else(|| DeliveryError::NotConnected(identity.to_string()))?;

        handle
            .send(envelope)
            .map_err(|source| DeliveryError::Transport {
                identity: identity.to_string(),
                source,
            })
    }

    /// Enqueue an envelope on an identity's channel, logging failures.
    pub fn deliver(&self, identity: &str, envelope: Arc<Envelope>) -> Delivery {
        let kind = envelope.kind();
        match self.try_deliver(identity, envelope) {
            Ok(()) => {
                trace!(identity = %identity, kind = %kind, "Delivered");
                Delivery::Delivered
            }
            Err(e @ DeliveryError::NotConnected(_)) => {
                trace!(identity = %identity, kind = %kind, "Recipient not connected");
                Delivery::from(&e)
            }
            Err(e) => {
                warn!(identity = %identity, kind = %kind, error = %e, "Delivery failed");
                Delivery::from(&e)
            }
        }
    }

    /// Deliver a single envelope, stamping the server timestamp if absent.
    pub fn send_to(&self, identity: &str, mut envelope: Envelope) -> Delivery {
        envelope.stamp(Utc::now());
        self.deliver(identity, Arc::new(envelope))
    }

    /// Deliver one envelope to each listed identity.
    ///
    /// Duplicate identities receive the envelope once.
    pub fn multicast<I, S>(&self, identities: I, mut envelope: Envelope) -> FanoutReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        envelope.stamp(Utc::now());
        let envelope = Arc::new(envelope);

        let mut seen = HashSet::new();
        let mut report = FanoutReport::default();
        for identity in identities {
            let identity = identity.as_ref();
            if seen.insert(identity.to_string()) {
                report.record(self.deliver(identity, Arc::clone(&envelope)));
            }
        }
        report
    }

    /// Deliver an envelope to every connected identity except `exclude`.
    pub fn broadcast(&self, mut envelope: Envelope, exclude: Option<&str>) -> FanoutReport {
        envelope.stamp(Utc::now());
        let envelope = Arc::new(envelope);
        let kind = envelope.kind();

        // Channels are collected first so no registry shard lock is held while sending.
        let targets: Vec<_> = self
            .registry
            .handles()
            .into_iter()
            .filter(|(identity, _)| Some(identity.as_str()) != exclude)
            .collect();

        let mut report = FanoutReport::default();
        for (identity, handle) in targets {
            match handle.send(Arc::clone(&envelope)) {
                Ok(()) => report.record(Delivery::Delivered),
                Err(e) => {
                    warn!(identity = %identity, kind = %kind, error = %e, "Broadcast delivery failed");
                    report.record(Delivery::Failed);
                }
            }
        }

        debug!(kind = %kind, delivered = report.delivered, failed = report.failed, "Broadcast");
        report
    }

    /// Persist a chat envelope from `sender` and fan it out.
    ///
    /// The sender and timestamp are assigned here; the stored id is attached
    /// before delivery. Direct and group messages are followed by a chat
    /// preview update on every recipient channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient or group does not exist, the
    /// envelope is not a chat kind, or the store fails. Nothing is persisted
    /// or delivered in that case.
    pub async fn route(
        &self,
        store: &dyn Store,
        sender: &str,
        envelope: Envelope,
    ) -> Result<RouteOutcome, RouteError> {
        let now = Utc::now();

        match envelope {
            Envelope::DirectMessage(message) => self.route_direct(store, sender, message, now).await,
            Envelope::GroupMessage(message) => self.route_group(store, sender, message, now).await,
            Envelope::Broadcast(mut message) => {
                let id = store
                    .persist_message(&NewMessage::from_chat(
                        sender,
                        MessageTarget::Broadcast,
                        &message,
                        now,
                    ))
                    .await?;
                assign(&mut message, id, sender, now);

                let report = self.broadcast(Envelope::Broadcast(message), None);
                Ok(RouteOutcome {
                    message_id: id,
                    report,
                })
            }
            other => Err(RouteError::Unsupported(other.kind())),
        }
    }

    async fn route_direct(
        &self,
        store: &dyn Store,
        sender: &str,
        mut message: ChatMessage,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome, RouteError> {
        let to = message.to.clone().ok_or(RouteError::MissingRecipient)?;
        if store.find_user(&to).await?.is_none() {
            return Err(RouteError::RecipientNotFound(to));
        }

        let id = store
            .persist_message(&NewMessage::from_chat(
                sender,
                MessageTarget::Direct(to.clone()),
                &message,
                now,
            ))
            .await?;
        assign(&mut message, id, sender, now);
        let preview_text = message.preview_text();
        let envelope = Arc::new(Envelope::DirectMessage(message));

        // The receiver sees the sender as the chat peer and vice versa.
        let mut recipients = vec![(to.clone(), sender.to_string())];
        if to != sender {
            recipients.push((sender.to_string(), to.clone()));
        }

        let mut report = FanoutReport::default();
        for (recipient, peer) in recipients {
            let delivery = self.deliver(&recipient, Arc::clone(&envelope));
            report.record(delivery);
            if delivery == Delivery::Delivered {
                let preview = Envelope::ChatPreviewUpdate(ChatPreview {
                    chat: peer,
                    is_group: false,
                    sender: sender.to_string(),
                    last_message: preview_text.clone(),
                    timestamp: now,
                });
                self.deliver(&recipient, Arc::new(preview));
            }
        }

        debug!(sender = %sender, to = %to, id, delivered = report.delivered, "Routed direct message");
        Ok(RouteOutcome {
            message_id: id,
            report,
        })
    }

    async fn route_group(
        &self,
        store: &dyn Store,
        sender: &str,
        mut message: ChatMessage,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome, RouteError> {
        let name = message.group.clone().ok_or(RouteError::MissingGroup)?;
        let group = store
            .find_group(&name)
            .await?
            .ok_or_else(|| RouteError::GroupNotFound(name.clone()))?;

        let id = store
            .persist_message(&NewMessage::from_chat(
                sender,
                MessageTarget::Group(name.clone()),
                &message,
                now,
            ))
            .await?;
        assign(&mut message, id, sender, now);

        let preview = Arc::new(Envelope::ChatPreviewUpdate(ChatPreview {
            chat: name.clone(),
            is_group: true,
            sender: sender.to_string(),
            last_message: message.preview_text(),
            timestamp: now,
        }));
        let envelope = Arc::new(Envelope::GroupMessage(message));

        let mut seen = HashSet::new();
        let mut report = FanoutReport::default();
        for member in &group.members {
            if !seen.insert(member.as_str()) {
                continue;
            }
            let delivery = self.deliver(member, Arc::clone(&envelope));
            report.record(delivery);
            if delivery == Delivery::Delivered {
                self.deliver(member, Arc::clone(&preview));
            }
        }

        debug!(sender = %sender, group = %name, id, delivered = report.delivered, "Routed group message");
        Ok(RouteOutcome {
            message_id: id,
            report,
        })
    }
}

fn assign(message: &mut ChatMessage, id: MessageId, sender: &str, now: DateTime<Utc>) {
    message.id = Some(id);
    message.sender = Some(sender.to_string());
    message.timestamp = Some(now);
}
