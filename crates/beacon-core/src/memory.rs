//! In-memory store.
//!
//! Backs the development server and the test suite. Cloning a
//! [`MemoryStore`] shares the same data, so every handle handed out by
//! [`StoreProvider::open`] sees the same users, groups and messages.

use crate::store::{
    Group, MessageId, NewMessage, PresenceChange, PresenceState, Store, StoreError,
    StoreProvider, StoredMessage, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct MemoryState {
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    messages: Vec<StoredMessage>,
}

/// Shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
    failing_opens: Arc<AtomicUsize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user, offline.
    #[must_use]
    pub fn with_user(self, username: impl Into<String>, name: impl Into<String>) -> Self {
        self.add_user(username, name);
        self
    }

    /// Add a group.
    #[must_use]
    pub fn with_group<I, S>(self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_group(name, members);
        self
    }

    /// Add a user, offline.
    pub fn add_user(&self, username: impl Into<String>, name: impl Into<String>) {
        let username = username.into();
        self.state.write().users.insert(
            username.clone(),
            User {
                username,
                name: name.into(),
                presence: PresenceState::default(),
            },
        );
    }

    /// Add or replace a group.
    pub fn add_group<I, S>(&self, name: impl Into<String>, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let group = Group {
            name: name.clone(),
            members: members.into_iter().map(Into::into).collect(),
        };
        self.state.write().groups.insert(name, group);
    }

    /// Overwrite a user's presence state directly.
    pub fn set_presence(&self, identity: &str, online: bool, last_active: Option<DateTime<Utc>>) {
        if let Some(user) = self.state.write().users.get_mut(identity) {
            user.presence = PresenceState {
                online,
                last_active,
            };
        }
    }

    /// Current presence state of a user.
    #[must_use]
    pub fn presence(&self, identity: &str) -> Option<PresenceState> {
        self.state
            .read()
            .users
            .get(identity)
            .map(|u| u.presence.clone())
    }

    /// All persisted messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<StoredMessage> {
        self.state.read().messages.clone()
    }

    /// Make the next `count` calls to `open` fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreProvider for MemoryStore {
    async fn open(&self) -> Result<Box<dyn Store>, StoreError> {
        let injected = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_user(&self, identity: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state.read().users.get(identity).cloned())
    }

    async fn find_group(&self, name: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.state.read().groups.get(name).cloned())
    }

    async fn persist_message(&self, message: &NewMessage) -> Result<MessageId, StoreError> {
        let mut state = self.state.write();
        let id = state.messages.len() as MessageId + 1;
        state.messages.push(StoredMessage {
            id,
            sender: message.sender.clone(),
            target: message.target.clone(),
            content: message.content.clone(),
            is_read: false,
            timestamp: message.timestamp,
        });
        debug!(id, sender = %message.sender, "Persisted message");
        Ok(id)
    }

    async fn update_presence(
        &self,
        identity: &str,
        online: bool,
        last_active: DateTime<Utc>,
    ) -> Result<PresenceChange, StoreError> {
        let mut state = self.state.write();
        let user = state
            .users
            .get_mut(identity)
            .ok_or_else(|| StoreError::UnknownUser(identity.to_string()))?;

        let change = if user.presence.online == online {
            PresenceChange::Unchanged
        } else {
            PresenceChange::Changed
        };
        user.presence = PresenceState {
            online,
            last_active: Some(last_active),
        };
        Ok(change)
    }

    async fn touch(&self, identity: &str, last_active: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let user = state
            .users
            .get_mut(identity)
            .ok_or_else(|| StoreError::UnknownUser(identity.to_string()))?;
        user.presence.last_active = Some(last_active);
        Ok(())
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<StoredMessage>, StoreError> {
        Ok(self
            .state
            .read()
            .messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn mark_read(&self, id: MessageId) -> Result<(), StoreError> {
        if let Some(message) = self.state.write().messages.iter_mut().find(|m| m.id == id) {
            message.is_read = true;
        }
        Ok(())
    }

    async fn stale_online_users(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let mut stale: Vec<String> = self
            .state
            .read()
            .users
            .values()
            .filter(|u| u.presence.online)
            .filter(|u| u.presence.last_active.map_or(true, |t| t < cutoff))
            .map(|u| u.username.clone())
            .collect();
        stale.sort();
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageTarget;
    use chrono::Duration;

    #[tokio::test]
    async fn test_presence_change_reporting() {
        let store = MemoryStore::new().with_user("alice", "Alice");
        let now = Utc::now();

        assert_eq!(
            store.update_presence("alice", true, now).await.unwrap(),
            PresenceChange::Changed
        );
        assert_eq!(
            store.update_presence("alice", true, now).await.unwrap(),
            PresenceChange::Unchanged
        );
        assert_eq!(
            store.update_presence("alice", false, now).await.unwrap(),
            PresenceChange::Changed
        );
        assert!(matches!(
            store.update_presence("nobody", true, now).await,
            Err(StoreError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_online_users() {
        let store = MemoryStore::new()
            .with_user("alice", "Alice")
            .with_user("bob", "Bob")
            .with_user("carol", "Carol");
        let now = Utc::now();

        store.set_presence("alice", true, Some(now - Duration::minutes(10)));
        store.set_presence("bob", true, Some(now));
        store.set_presence("carol", false, Some(now - Duration::minutes(10)));

        let stale = store
            .stale_online_users(now - Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(stale, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_messages_get_sequential_ids() {
        let store = MemoryStore::new();
        let message = NewMessage {
            sender: "alice".into(),
            target: MessageTarget::Broadcast,
            content: Some("hi".into()),
            file_path: None,
            file_type: None,
            timestamp: Utc::now(),
        };

        assert_eq!(store.persist_message(&message).await.unwrap(), 1);
        assert_eq!(store.persist_message(&message).await.unwrap(), 2);

        store.mark_read(2).await.unwrap();
        let stored = store.find_message(2).await.unwrap().unwrap();
        assert!(stored.is_read);
        assert!(store.find_message(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_open_failures() {
        let store = MemoryStore::new();
        store.fail_next_opens(1);

        assert!(store.open().await.is_err());
        assert!(store.open().await.is_ok());
    }
}
