//! Interfaces to the durable store.
//!
//! User records, group membership and persisted messages live outside the
//! core. The core reaches them through [`Store`] handles obtained from a
//! [`StoreProvider`]; a handle is acquired per unit of work (handshake,
//! processed frame, sweep iteration) and dropped when that work is done.

use async_trait::async_trait;
use beacon_protocol::ChatMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a persisted message.
pub type MessageId = u64;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A handle could not be acquired.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The identity has no user record.
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// The backend failed.
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Durable online/offline state of a user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PresenceState {
    pub online: bool,
    pub last_active: Option<DateTime<Utc>>,
}

/// A user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub name: String,
    pub presence: PresenceState,
}

/// A group and its members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub members: Vec<String>,
}

/// Addressing of a persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageTarget {
    Direct(String),
    Group(String),
    Broadcast,
}

/// A message about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: String,
    pub target: MessageTarget,
    pub content: Option<String>,
    pub file_path: Option<String>,
    pub file_type: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NewMessage {
    /// Build a record from a chat message.
    #[must_use]
    pub fn from_chat(
        sender: impl Into<String>,
        target: MessageTarget,
        message: &ChatMessage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            target,
            content: message.content.clone(),
            file_path: message.file_path.clone(),
            file_type: message.file_type.clone(),
            timestamp,
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: MessageId,
    pub sender: String,
    pub target: MessageTarget,
    pub content: Option<String>,
    pub is_read: bool,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of a presence write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceChange {
    /// The online flag flipped.
    Changed,
    /// The online flag already had the requested value.
    Unchanged,
}

impl PresenceChange {
    #[must_use]
    pub fn is_changed(&self) -> bool {
        matches!(self, PresenceChange::Changed)
    }
}

/// A handle to the durable store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Look up a user record.
    async fn find_user(&self, identity: &str) -> Result<Option<User>, StoreError>;

    /// Look up a group and its members.
    async fn find_group(&self, name: &str) -> Result<Option<Group>, StoreError>;

    /// Persist a message and return its id.
    async fn persist_message(&self, message: &NewMessage) -> Result<MessageId, StoreError>;

    /// Set the online flag and last-active time.
    ///
    /// Reports whether the flag flipped, so callers can emit exactly one
    /// status change per transition.
    async fn update_presence(
        &self,
        identity: &str,
        online: bool,
        last_active: DateTime<Utc>,
    ) -> Result<PresenceChange, StoreError>;

    /// Refresh last-active without changing the online flag.
    async fn touch(&self, identity: &str, last_active: DateTime<Utc>) -> Result<(), StoreError>;

    /// Look up a persisted message.
    async fn find_message(&self, id: MessageId) -> Result<Option<StoredMessage>, StoreError>;

    /// Mark a persisted message as read.
    async fn mark_read(&self, id: MessageId) -> Result<(), StoreError>;

    /// Users flagged online whose last activity is older than `cutoff`.
    async fn stale_online_users(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError>;
}

/// Source of fresh store handles.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    /// Acquire a new handle.
    async fn open(&self) -> Result<Box<dyn Store>, StoreError>;
}
