//! Envelope types for the Beacon protocol.
//!
//! An envelope is the unit exchanged over a connection in both directions.
//! Every envelope carries a `type` tag on the wire; the remaining fields
//! depend on the kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Envelope kind tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    DirectMessage,
    GroupMessage,
    Broadcast,
    Status,
    MessageStatus,
    ChatPreviewUpdate,
    NoticePost,
    Heartbeat,
    Error,
}

impl EnvelopeKind {
    /// All kinds, in wire order.
    pub const ALL: [EnvelopeKind; 9] = [
        EnvelopeKind::DirectMessage,
        EnvelopeKind::GroupMessage,
        EnvelopeKind::Broadcast,
        EnvelopeKind::Status,
        EnvelopeKind::MessageStatus,
        EnvelopeKind::ChatPreviewUpdate,
        EnvelopeKind::NoticePost,
        EnvelopeKind::Heartbeat,
        EnvelopeKind::Error,
    ];

    /// The wire tag for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::DirectMessage => "direct_message",
            EnvelopeKind::GroupMessage => "group_message",
            EnvelopeKind::Broadcast => "broadcast",
            EnvelopeKind::Status => "status",
            EnvelopeKind::MessageStatus => "message_status",
            EnvelopeKind::ChatPreviewUpdate => "chat_preview_update",
            EnvelopeKind::NoticePost => "notice_post",
            EnvelopeKind::Heartbeat => "heartbeat",
            EnvelopeKind::Error => "error",
        }
    }

    /// Look up a kind by its wire tag.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Kinds that only the server emits. Clients sending these are ignored.
    #[must_use]
    pub fn is_server_only(&self) -> bool {
        matches!(
            self,
            EnvelopeKind::Status
                | EnvelopeKind::ChatPreviewUpdate
                | EnvelopeKind::NoticePost
                | EnvelopeKind::Error
        )
    }

    /// Kinds that carry user-authored `content`.
    #[must_use]
    pub fn is_chat(&self) -> bool {
        matches!(
            self,
            EnvelopeKind::DirectMessage | EnvelopeKind::GroupMessage | EnvelopeKind::Broadcast
        )
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Online/offline status of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    #[must_use]
    pub fn is_online(&self) -> bool {
        matches!(self, PresenceStatus::Online)
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceStatus::Online => f.write_str("online"),
            PresenceStatus::Offline => f.write_str("offline"),
        }
    }
}

/// Delivery status reported by a recipient for a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
    Seen,
}

/// Category of an error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown recipient, group or message.
    NotFound,
    /// Malformed frame or invalid content.
    Validation,
    /// The server failed while processing the frame.
    Internal,
}

/// A user-authored chat message (direct, group or broadcast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Stored message id, assigned by the server after persistence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Sender identity, assigned by the server.
    #[serde(rename = "from", skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// Receiver identity for direct messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Group name for group messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Message text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Path of an uploaded attachment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// MIME type of the attachment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Server timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Create a message with the given content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            sender: None,
            to: None,
            group: None,
            content: Some(content.into()),
            file_path: None,
            file_type: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Attach an uploaded file.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>, mime: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self.file_type = Some(mime.into());
        self
    }

    /// Text shown in a chat list for this message.
    ///
    /// Attachments without text are shown as `[File] <name>`.
    #[must_use]
    pub fn preview_text(&self) -> String {
        match (&self.content, &self.file_path) {
            (Some(content), _) => content.clone(),
            (None, Some(path)) => {
                let name = path.rsplit('/').next().unwrap_or(path);
                format!("[File] {}", name)
            }
            (None, None) => String::new(),
        }
    }
}

/// Presence change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub username: String,
    pub status: PresenceStatus,
}

/// Delivery/read receipt for a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatusUpdate {
    pub message_id: u64,
    pub status: DeliveryStatus,
}

/// Update for a single row of a client's chat list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPreview {
    /// Peer identity for direct chats, group name for group chats.
    pub chat: String,
    pub is_group: bool,
    #[serde(rename = "from")]
    pub sender: String,
    pub last_message: String,
    pub timestamp: DateTime<Utc>,
}

/// A post published to a notice board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticePost {
    pub board: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_path: Option<String>,
    pub posted_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Error reported back to the originating connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: ErrorKind,
    pub error: String,
}

/// A protocol envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// One-to-one message.
    DirectMessage(ChatMessage),
    /// Message to every member of a group.
    GroupMessage(ChatMessage),
    /// Message to every connected user.
    Broadcast(ChatMessage),
    /// A user went online or offline.
    Status(StatusUpdate),
    /// Delivery/read receipt.
    MessageStatus(MessageStatusUpdate),
    /// Chat list row changed.
    ChatPreviewUpdate(ChatPreview),
    /// Notice board post for followers.
    NoticePost(NoticePost),
    /// Keepalive, in either direction.
    Heartbeat,
    /// Error response.
    Error(ErrorNotice),
}

impl Envelope {
    /// Get the envelope kind.
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::DirectMessage(_) => EnvelopeKind::DirectMessage,
            Envelope::GroupMessage(_) => EnvelopeKind::GroupMessage,
            Envelope::Broadcast(_) => EnvelopeKind::Broadcast,
            Envelope::Status(_) => EnvelopeKind::Status,
            Envelope::MessageStatus(_) => EnvelopeKind::MessageStatus,
            Envelope::ChatPreviewUpdate(_) => EnvelopeKind::ChatPreviewUpdate,
            Envelope::NoticePost(_) => EnvelopeKind::NoticePost,
            Envelope::Heartbeat => EnvelopeKind::Heartbeat,
            Envelope::Error(_) => EnvelopeKind::Error,
        }
    }

    /// Create a direct message addressed to `to`.
    #[must_use]
    pub fn direct(to: impl Into<String>, content: impl Into<String>) -> Self {
        Envelope::DirectMessage(ChatMessage::new(content).with_to(to))
    }

    /// Create a group message addressed to `group`.
    #[must_use]
    pub fn group(group: impl Into<String>, content: impl Into<String>) -> Self {
        Envelope::GroupMessage(ChatMessage::new(content).with_group(group))
    }

    /// Create a broadcast message.
    #[must_use]
    pub fn broadcast(content: impl Into<String>) -> Self {
        Envelope::Broadcast(ChatMessage::new(content))
    }

    /// Create a status envelope.
    #[must_use]
    pub fn status(username: impl Into<String>, status: PresenceStatus) -> Self {
        Envelope::Status(StatusUpdate {
            username: username.into(),
            status,
        })
    }

    /// Create a message status envelope.
    #[must_use]
    pub fn message_status(message_id: u64, status: DeliveryStatus) -> Self {
        Envelope::MessageStatus(MessageStatusUpdate { message_id, status })
    }

    /// Create an error envelope.
    #[must_use]
    pub fn error(kind: ErrorKind, error: impl Into<String>) -> Self {
        Envelope::Error(ErrorNotice {
            kind,
            error: error.into(),
        })
    }

    /// Borrow the chat message for message-bearing kinds.
    #[must_use]
    pub fn as_chat(&self) -> Option<&ChatMessage> {
        match self {
            Envelope::DirectMessage(m) | Envelope::GroupMessage(m) | Envelope::Broadcast(m) => {
                Some(m)
            }
            _ => None,
        }
    }

    /// Get the server timestamp, for kinds that carry one.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Envelope::DirectMessage(m) | Envelope::GroupMessage(m) | Envelope::Broadcast(m) => {
                m.timestamp
            }
            Envelope::ChatPreviewUpdate(p) => Some(p.timestamp),
            Envelope::NoticePost(p) => p.timestamp,
            _ => None,
        }
    }

    /// Populate the server timestamp if the kind carries one and it is absent.
    pub fn stamp(&mut self, now: DateTime<Utc>) {
        match self {
            Envelope::DirectMessage(m) | Envelope::GroupMessage(m) | Envelope::Broadcast(m) => {
                m.timestamp.get_or_insert(now);
            }
            Envelope::NoticePost(p) => {
                p.timestamp.get_or_insert(now);
            }
            _ => {}
        }
    }
}
