//! Presence lifecycle.
//!
//! Drives the `Offline -> Online -> Offline` transitions of a user: the
//! durable flag in the store, the registry entry, and the `status` broadcast
//! to everyone else.

use crate::registry::ConnectionRegistry;
use crate::router::FanoutRouter;
use crate::store::{PresenceChange, Store, StoreError};
use beacon_protocol::{CloseCode, CloseReason, Envelope, PresenceStatus};
use beacon_transport::{ConnectionId, OutboundHandle};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// Why a user is going offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineCause {
    /// The user logged out explicitly.
    Logout,
    /// The session's channel closed or failed.
    Disconnected(ConnectionId),
    /// The liveness sweep found the user silent for too long.
    Inactive,
}

impl OfflineCause {
    /// Close request sent to the live channel, if the cause closes it.
    #[must_use]
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self {
            OfflineCause::Logout => Some(CloseReason::with_reason(CloseCode::Normal, "logged out")),
            OfflineCause::Inactive => Some(CloseReason::new(CloseCode::Inactive)),
            OfflineCause::Disconnected(_) => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            OfflineCause::Logout => "logout",
            OfflineCause::Disconnected(_) => "disconnected",
            OfflineCause::Inactive => "inactive",
        }
    }
}

/// Presence state machine.
///
/// Transitions for one identity run one at a time: the registry change, the
/// store write and the status broadcast of a transition complete before the
/// next transition for that identity starts.
#[derive(Debug, Clone)]
pub struct PresenceLifecycle {
    registry: Arc<ConnectionRegistry>,
    router: FanoutRouter,
    transitions: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PresenceLifecycle {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, router: FanoutRouter) -> Self {
        Self {
            registry,
            router,
            transitions: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to an identity's transitions.
    async fn lock(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(&*self.transitions.entry(identity.to_string()).or_default());
        lock.lock_owned().await
    }

    /// Mark a user online and register its channel.
    ///
    /// A channel already registered for the identity is closed as
    /// superseded. Other connected users are told about the transition only
    /// if the user was offline before.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails; the channel is not
    /// registered in that case.
    pub async fn go_online(
        &self,
        store: &dyn Store,
        identity: &str,
        handle: OutboundHandle,
    ) -> Result<PresenceChange, StoreError> {
        let _transition = self.lock(identity).await;
        let change = store.update_presence(identity, true, Utc::now()).await?;
        let connection = handle.id().clone();

        if let Some(previous) = self.registry.register(identity, handle) {
            debug!(
                identity = %identity,
                connection = %previous.id(),
                "Closing superseded connection"
            );
            previous.close(CloseCode::Superseded);
        }

        if change.is_changed() {
            let report = self
                .router
                .broadcast(Envelope::status(identity, PresenceStatus::Online), Some(identity));
            info!(
                identity = %identity,
                connection = %connection,
                notified = report.delivered,
                "User online"
            );
        }
        Ok(change)
    }

    /// Mark a user offline and remove its channel.
    ///
    /// A `Disconnected` cause only applies while that connection is still
    /// the registered one, so a superseded session ending changes nothing.
    /// Marking an already offline user offline broadcasts nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the store update fails. The registry entry has
    /// been removed by then; the liveness sweep reconciles the flag.
    pub async fn go_offline(
        &self,
        store: &dyn Store,
        identity: &str,
        cause: OfflineCause,
    ) -> Result<PresenceChange, StoreError> {
        let _transition = self.lock(identity).await;
        match &cause {
            OfflineCause::Disconnected(connection) => {
                if !self.registry.unregister_connection(identity, connection) {
                    return Ok(PresenceChange::Unchanged);
                }
            }
            OfflineCause::Logout | OfflineCause::Inactive => {
                if let (Some(handle), Some(reason)) =
                    (self.registry.unregister(identity), cause.close_reason())
                {
                    handle.close(reason);
                }
            }
        }

        let change = store.update_presence(identity, false, Utc::now()).await?;
        if change.is_changed() {
            let report = self
                .router
                .broadcast(Envelope::status(identity, PresenceStatus::Offline), Some(identity));
            info!(
                identity = %identity,
                cause = cause.as_str(),
                notified = report.delivered,
                "User offline"
            );
        } else {
            debug!(identity = %identity, cause = cause.as_str(), "User already offline");
        }
        Ok(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::{Group, MessageId, NewMessage, StoredMessage, User};
    use async_trait::async_trait;
    use beacon_transport::{outbound, Outbound, OutboundQueue};
    use chrono::DateTime;
    use tokio::sync::Notify;

    fn setup() -> (PresenceLifecycle, Arc<ConnectionRegistry>, MemoryStore) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry));
        let store = MemoryStore::new()
            .with_user("alice", "Alice")
            .with_user("bob", "Bob");
        (PresenceLifecycle::new(Arc::clone(&registry), router), registry, store)
    }

    fn channel(id: &str) -> (OutboundHandle, OutboundQueue) {
        outbound::channel(ConnectionId::new(id), 16)
    }

    #[tokio::test]
    async fn test_online_broadcasts_to_others() {
        let (presence, _registry, store) = setup();
        let (bob, mut bob_queue) = channel("b1");
        let (alice, mut alice_queue) = channel("a1");

        presence.go_online(&store, "bob", bob).await.unwrap();
        presence.go_online(&store, "alice", alice).await.unwrap();

        assert_eq!(
            bob_queue.drain_envelopes(),
            vec![Envelope::status("alice", PresenceStatus::Online)]
        );
        assert!(alice_queue.drain_envelopes().is_empty());
        assert!(store.presence("alice").unwrap().online);
    }

    #[tokio::test]
    async fn test_offline_is_idempotent() {
        let (presence, _registry, store) = setup();
        let (bob, mut bob_queue) = channel("b1");
        let (alice, _alice_queue) = channel("a1");
        presence.go_online(&store, "bob", bob).await.unwrap();
        presence.go_online(&store, "alice", alice).await.unwrap();
        bob_queue.drain_envelopes();

        let first = presence
            .go_offline(&store, "alice", OfflineCause::Logout)
            .await
            .unwrap();
        let second = presence
            .go_offline(&store, "alice", OfflineCause::Logout)
            .await
            .unwrap();

        assert!(first.is_changed());
        assert!(!second.is_changed());
        assert_eq!(
            bob_queue.drain_envelopes(),
            vec![Envelope::status("alice", PresenceStatus::Offline)]
        );
    }

    #[tokio::test]
    async fn test_logout_closes_channel() {
        let (presence, registry, store) = setup();
        let (alice, mut queue) = channel("a1");
        presence.go_online(&store, "alice", alice.clone()).await.unwrap();

        presence
            .go_offline(&store, "alice", OfflineCause::Logout)
            .await
            .unwrap();

        assert!(alice.is_closed());
        assert!(!registry.is_connected("alice"));
        match queue.try_next() {
            Some(Outbound::Close(reason)) => {
                assert_eq!(reason.code, CloseCode::Normal);
                assert_eq!(reason.reason, "logged out");
            }
            other => panic!("Expected close, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_superseded_session_end_keeps_successor() {
        let (presence, registry, store) = setup();
        let (first, mut first_queue) = channel("a1");
        let (second, _second_queue) = channel("a2");

        presence.go_online(&store, "alice", first.clone()).await.unwrap();
        let change = presence.go_online(&store, "alice", second).await.unwrap();
        assert!(!change.is_changed());

        assert!(first.is_closed());
        match first_queue.try_next() {
            Some(Outbound::Close(reason)) => assert_eq!(reason.code, CloseCode::Superseded),
            other => panic!("Expected close, got {:?}", other),
        }

        let change = presence
            .go_offline(
                &store,
                "alice",
                OfflineCause::Disconnected(ConnectionId::new("a1")),
            )
            .await
            .unwrap();

        assert!(!change.is_changed());
        assert!(registry.is_current("alice", &ConnectionId::new("a2")));
        assert!(store.presence("alice").unwrap().online);
    }

    /// Store whose offline writes wait until released.
    #[derive(Clone)]
    struct GatedStore {
        inner: MemoryStore,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl Store for GatedStore {
        async fn find_user(&self, identity: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user(identity).await
        }

        async fn find_group(&self, name: &str) -> Result<Option<Group>, StoreError> {
            self.inner.find_group(name).await
        }

        async fn persist_message(&self, message: &NewMessage) -> Result<MessageId, StoreError> {
            self.inner.persist_message(message).await
        }

        async fn update_presence(
            &self,
            identity: &str,
            online: bool,
            last_active: DateTime<Utc>,
        ) -> Result<PresenceChange, StoreError> {
            if !online {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.update_presence(identity, online, last_active).await
        }

        async fn touch(&self, identity: &str, last_active: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.touch(identity, last_active).await
        }

        async fn find_message(&self, id: MessageId) -> Result<Option<StoredMessage>, StoreError> {
            self.inner.find_message(id).await
        }

        async fn mark_read(&self, id: MessageId) -> Result<(), StoreError> {
            self.inner.mark_read(id).await
        }

        async fn stale_online_users(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
            self.inner.stale_online_users(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_pending_disconnect() {
        let (presence, registry, store) = setup();
        let (bob, mut bob_queue) = channel("b1");
        let (first, _first_queue) = channel("a1");
        presence.go_online(&store, "bob", bob).await.unwrap();
        presence.go_online(&store, "alice", first).await.unwrap();
        bob_queue.drain_envelopes();

        let gated = GatedStore {
            inner: store.clone(),
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };

        let ending = {
            let presence = presence.clone();
            let gated = gated.clone();
            tokio::spawn(async move {
                presence
                    .go_offline(
                        &gated,
                        "alice",
                        OfflineCause::Disconnected(ConnectionId::new("a1")),
                    )
                    .await
            })
        };
        gated.entered.notified().await;

        let (second, _second_queue) = channel("a2");
        let reconnect = {
            let presence = presence.clone();
            let store = store.clone();
            tokio::spawn(async move { presence.go_online(&store, "alice", second).await })
        };
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(!registry.is_connected("alice"));

        gated.release.notify_one();
        assert!(ending.await.unwrap().unwrap().is_changed());
        assert!(reconnect.await.unwrap().unwrap().is_changed());

        assert!(registry.is_current("alice", &ConnectionId::new("a2")));
        assert!(store.presence("alice").unwrap().online);
        assert_eq!(
            bob_queue.drain_envelopes(),
            vec![
                Envelope::status("alice", PresenceStatus::Offline),
                Envelope::status("alice", PresenceStatus::Online),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_registered() {
        let (presence, registry, store) = setup();
        let (zed, _queue) = channel("z1");

        let result = presence.go_online(&store, "zed", zed).await;
        assert!(matches!(result, Err(StoreError::UnknownUser(_))));
        assert!(registry.is_empty());
    }
}
