//! The presence hub.
//!
//! [`Hub`] owns the registry, router and presence lifecycle together with
//! the store provider and authenticator, and runs full connection sessions.
//! It is an ordinary value: build one per server (or per test) and share it
//! behind an `Arc`.

use crate::auth::{AuthError, Authenticator};
use crate::dispatcher::{Dispatcher, SessionEnd};
use crate::liveness::{spawn_heartbeat, LivenessConfig, LivenessMonitor};
use crate::presence::{OfflineCause, PresenceLifecycle};
use crate::registry::ConnectionRegistry;
use crate::router::{Delivery, FanoutReport, FanoutRouter};
use crate::store::{PresenceChange, StoreError, StoreProvider};
use beacon_protocol::{CloseCode, CloseReason, Envelope};
use beacon_transport::outbound::DEFAULT_OUTBOUND_CAPACITY;
use beacon_transport::{ConnectionId, FrameSource, OutboundHandle};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Hub configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Maximum characters of chat content.
    pub max_content_chars: usize,
    /// Maximum size of an inbound frame in bytes.
    pub max_frame_bytes: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
    /// Heartbeat and sweep timing.
    pub liveness: LivenessConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 1000,
            max_frame_bytes: 64 * 1024,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            liveness: LivenessConfig::default(),
        }
    }
}

/// Handshake failures. No presence state changes when one is returned.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Token subject '{subject}' does not match '{identity}'")]
    IdentityMismatch { identity: String, subject: String },

    #[error("User '{0}' not found")]
    UnknownUser(String),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

impl ConnectError {
    /// Close code sent to the rejected connection.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            ConnectError::Auth(_) | ConnectError::IdentityMismatch { .. } => CloseCode::AuthFailed,
            ConnectError::UnknownUser(_) | ConnectError::Store(StoreError::UnknownUser(_)) => {
                CloseCode::UnknownUser
            }
            ConnectError::Store(_) => CloseCode::Internal,
        }
    }
}

/// An accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionTicket {
    pub identity: String,
    pub connection: ConnectionId,
    /// Whether the user went from offline to online.
    pub change: PresenceChange,
    /// Cancelled when the session must end; a child of the channel's token.
    pub cancel: CancellationToken,
}

/// Connection registry, fanout and presence for one process.
pub struct Hub {
    registry: Arc<ConnectionRegistry>,
    router: FanoutRouter,
    presence: PresenceLifecycle,
    stores: Arc<dyn StoreProvider>,
    auth: Arc<dyn Authenticator>,
    config: HubConfig,
}

impl Hub {
    #[must_use]
    pub fn new(
        stores: Arc<dyn StoreProvider>,
        auth: Arc<dyn Authenticator>,
        config: HubConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = FanoutRouter::new(Arc::clone(&registry));
        let presence = PresenceLifecycle::new(Arc::clone(&registry), router.clone());

        Self {
            registry,
            router,
            presence,
            stores,
            auth,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    #[must_use]
    pub fn router(&self) -> &FanoutRouter {
        &self.router
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<dyn StoreProvider> {
        &self.stores
    }

    /// Authenticate `token` as a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not valid.
    pub fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        self.auth.authenticate(token)
    }

    /// Complete a handshake: authenticate, check the user record, mark the
    /// user online and register the channel.
    ///
    /// # Errors
    ///
    /// Returns an error, without changing any state, if the token is bad,
    /// names another user, the user does not exist, or the store fails.
    pub async fn connect(
        &self,
        identity: &str,
        token: &str,
        handle: OutboundHandle,
    ) -> Result<ConnectionTicket, ConnectError> {
        let subject = self.auth.authenticate(token)?;
        if subject != identity {
            return Err(ConnectError::IdentityMismatch {
                identity: identity.to_string(),
                subject,
            });
        }

        let store = self.stores.open().await?;
        if store.find_user(identity).await?.is_none() {
            return Err(ConnectError::UnknownUser(identity.to_string()));
        }

        let connection = handle.id().clone();
        let cancel = handle.closed_token().child_token();
        let change = self.presence.go_online(store.as_ref(), identity, handle).await?;

        Ok(ConnectionTicket {
            identity: identity.to_string(),
            connection,
            change,
            cancel,
        })
    }

    /// Handle the end of a session.
    ///
    /// Does nothing if `connection` is no longer the identity's registered
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn disconnect(
        &self,
        identity: &str,
        connection: &ConnectionId,
    ) -> Result<PresenceChange, StoreError> {
        if !self.registry.is_current(identity, connection) {
            debug!(identity = %identity, connection = %connection, "Superseded session ended");
            return Ok(PresenceChange::Unchanged);
        }

        let store = self.stores.open().await?;
        self.presence
            .go_offline(
                store.as_ref(),
                identity,
                OfflineCause::Disconnected(connection.clone()),
            )
            .await
    }

    /// Log a user out: mark offline and close its live channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn logout(&self, identity: &str) -> Result<PresenceChange, StoreError> {
        let store = self.stores.open().await?;
        self.presence
            .go_offline(store.as_ref(), identity, OfflineCause::Logout)
            .await
    }

    /// Deliver an envelope to one identity.
    pub fn send_to(&self, identity: &str, envelope: Envelope) -> Delivery {
        self.router.send_to(identity, envelope)
    }

    /// Deliver an envelope to every connected identity except `exclude`.
    pub fn broadcast(&self, envelope: Envelope, exclude: Option<&str>) -> FanoutReport {
        self.router.broadcast(envelope, exclude)
    }

    /// Deliver an envelope to each listed identity.
    pub fn multicast<I, S>(&self, identities: I, envelope: Envelope) -> FanoutReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.router.multicast(identities, envelope)
    }

    #[must_use]
    pub fn is_connected(&self, identity: &str) -> bool {
        self.registry.is_connected(identity)
    }

    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn connected(&self) -> BTreeSet<String> {
        self.registry.snapshot()
    }

    /// Build the staleness sweep for this hub.
    #[must_use]
    pub fn liveness_monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(
            self.presence.clone(),
            Arc::clone(&self.stores),
            self.config.liveness,
        )
    }

    /// Run a full session on an already accepted transport.
    ///
    /// Performs the handshake, then runs the heartbeat task and the receive
    /// loop until the connection ends, and finally hands off to the offline
    /// transition. A rejected handshake closes `handle` with the matching
    /// close code.
    ///
    /// # Errors
    ///
    /// Returns the handshake failure, if any.
    pub async fn serve<S: FrameSource>(
        &self,
        identity: &str,
        token: &str,
        source: S,
        handle: OutboundHandle,
    ) -> Result<SessionEnd, ConnectError> {
        let ticket = match self.connect(identity, token, handle.clone()).await {
            Ok(ticket) => ticket,
            Err(e) => {
                warn!(identity = %identity, error = %e, "Handshake rejected");
                handle.close(CloseReason::with_reason(e.close_code(), e.to_string()));
                return Err(e);
            }
        };

        info!(identity = %identity, connection = %ticket.connection, "Session started");

        let heartbeat = spawn_heartbeat(
            handle.clone(),
            self.config.liveness.heartbeat_interval,
            ticket.cancel.clone(),
        );

        let end = Dispatcher::new(self, identity, handle.clone())
            .run(source, ticket.cancel.clone())
            .await;

        ticket.cancel.cancel();
        if let Err(e) = heartbeat.await {
            error!(identity = %identity, error = %e, "Heartbeat task failed");
        }

        if let Err(e) = self.disconnect(identity, &ticket.connection).await {
            error!(identity = %identity, error = %e, "Failed to record disconnect");
        }
        handle.close(CloseCode::GoingAway);

        info!(identity = %identity, connection = %ticket.connection, end = ?end, "Session ended");
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokens;
    use crate::memory::MemoryStore;
    use beacon_protocol::{
        codec, DeliveryStatus, EnvelopeKind, ErrorKind, NoticePost, PresenceStatus, WireFormat,
    };
    use beacon_transport::memory::{self, MemoryClient};
    use beacon_transport::outbound;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const WAIT: Duration = Duration::from_secs(2);

    fn store() -> MemoryStore {
        MemoryStore::new()
            .with_user("alice", "Alice")
            .with_user("bob", "Bob")
            .with_user("carol", "Carol")
            .with_group("team", ["alice", "bob", "carol"])
    }

    fn tokens() -> StaticTokens {
        StaticTokens::new()
            .with_token("alice-token", "alice")
            .with_token("bob-token", "bob")
            .with_token("carol-token", "carol")
            .with_token("ghost-token", "ghost")
    }

    fn hub_with(store: &MemoryStore, config: HubConfig) -> Arc<Hub> {
        Arc::new(Hub::new(Arc::new(store.clone()), Arc::new(tokens()), config))
    }

    struct Session {
        client: MemoryClient,
        task: JoinHandle<Result<SessionEnd, ConnectError>>,
    }

    fn open(hub: &Arc<Hub>, identity: &str, token: &str) -> Session {
        let (source, sink, client) = memory::pair();
        let (handle, queue) = outbound::channel(ConnectionId::generate(), hub.config().outbound_capacity);
        outbound::spawn_writer(queue, sink, WireFormat::Json);

        let hub = Arc::clone(hub);
        let identity = identity.to_string();
        let token = token.to_string();
        let task = tokio::spawn(async move { hub.serve(&identity, &token, source, handle).await });
        Session { client, task }
    }

    async fn wait_connected(hub: &Hub, identity: &str) {
        tokio::time::timeout(WAIT, async {
            while !hub.is_connected(identity) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connected in time");
    }

    async fn next(client: &mut MemoryClient) -> Envelope {
        client.recv_timeout(WAIT).await.expect("envelope in time")
    }

    /// Skip heartbeats and status updates.
    async fn next_chat(client: &mut MemoryClient) -> Envelope {
        loop {
            let envelope = next(client).await;
            if !matches!(envelope.kind(), EnvelopeKind::Heartbeat | EnvelopeKind::Status) {
                return envelope;
            }
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_token() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut session = open(&hub, "alice", "nope");

        assert!(matches!(session.task.await.unwrap(), Err(ConnectError::Auth(_))));
        assert_eq!(session.client.recv_timeout(WAIT).await, None);
        assert_eq!(
            session.client.close_reason().map(|r| r.code),
            Some(CloseCode::AuthFailed)
        );
        assert!(!store.presence("alice").unwrap().online);
    }

    #[tokio::test]
    async fn test_rejects_subject_mismatch_and_unknown_user() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());

        let mut mismatch = open(&hub, "alice", "bob-token");
        assert!(matches!(
            mismatch.task.await.unwrap(),
            Err(ConnectError::IdentityMismatch { .. })
        ));
        mismatch.client.recv_timeout(WAIT).await;
        assert_eq!(
            mismatch.client.close_reason().map(|r| r.code),
            Some(CloseCode::AuthFailed)
        );

        let mut ghost = open(&hub, "ghost", "ghost-token");
        assert!(matches!(
            ghost.task.await.unwrap(),
            Err(ConnectError::UnknownUser(_))
        ));
        ghost.client.recv_timeout(WAIT).await;
        assert_eq!(
            ghost.client.close_reason().map(|r| r.code),
            Some(CloseCode::UnknownUser)
        );
        assert_eq!(hub.connected_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_during_handshake() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        store.fail_next_opens(1);

        let mut session = open(&hub, "alice", "alice-token");
        let err = session.task.await.unwrap().unwrap_err();
        assert_eq!(err.close_code(), CloseCode::Internal);
        session.client.recv_timeout(WAIT).await;
        assert_eq!(
            session.client.close_reason().map(|r| r.code),
            Some(CloseCode::Internal)
        );
    }

    #[tokio::test]
    async fn test_connect_announces_and_disconnect_cleans_up() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());

        let mut bob = open(&hub, "bob", "bob-token");
        wait_connected(&hub, "bob").await;
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        assert_eq!(
            next(&mut bob.client).await,
            Envelope::status("alice", PresenceStatus::Online)
        );
        assert!(store.presence("alice").unwrap().online);

        alice.client.close();
        assert_eq!(alice.task.await.unwrap().unwrap(), SessionEnd::Closed);

        assert_eq!(
            next(&mut bob.client).await,
            Envelope::status("alice", PresenceStatus::Offline)
        );
        assert!(!hub.is_connected("alice"));
        assert!(!store.presence("alice").unwrap().online);
    }

    #[tokio::test]
    async fn test_reconnect_supersedes_without_flapping() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());

        let mut first = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;
        let _second = open(&hub, "alice", "alice-token");

        assert_eq!(first.task.await.unwrap().unwrap(), SessionEnd::Cancelled);
        assert_eq!(first.client.recv_timeout(WAIT).await, None);
        assert_eq!(
            first.client.close_reason().map(|r| r.code),
            Some(CloseCode::Superseded)
        );

        assert!(hub.is_connected("alice"));
        assert!(store.presence("alice").unwrap().online);
    }

    #[tokio::test]
    async fn test_direct_message_round_trip() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        let mut bob = open(&hub, "bob", "bob-token");
        wait_connected(&hub, "alice").await;
        wait_connected(&hub, "bob").await;

        alice.client.send(&Envelope::direct("bob", "hi bob")).unwrap();

        let received = next_chat(&mut bob.client).await;
        let chat = received.as_chat().unwrap();
        assert_eq!(chat.sender.as_deref(), Some("alice"));
        assert_eq!(chat.content.as_deref(), Some("hi bob"));
        assert!(chat.timestamp.is_some());
        assert_eq!(
            next_chat(&mut bob.client).await.kind(),
            EnvelopeKind::ChatPreviewUpdate
        );

        let echoed = next_chat(&mut alice.client).await;
        assert_eq!(echoed.kind(), EnvelopeKind::DirectMessage);
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_validation_errors_keep_session_alive() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        alice
            .client
            .send(&Envelope::broadcast("a".repeat(1001)))
            .unwrap();
        assert_eq!(
            next_chat(&mut alice.client).await,
            Envelope::error(ErrorKind::Validation, "Message too long (max 1000 characters)")
        );

        alice.client.send_text(r#"{"content":"no type"}"#).unwrap();
        assert_eq!(
            next_chat(&mut alice.client).await,
            Envelope::error(ErrorKind::Validation, "Missing message type")
        );

        alice.client.send_text(r#"{"type":"typing","to":"bob"}"#).unwrap();
        alice.client.send(&Envelope::direct("zed", "hello")).unwrap();
        assert_eq!(
            next_chat(&mut alice.client).await,
            Envelope::error(ErrorKind::NotFound, "User 'zed' not found")
        );
        assert!(store.messages().is_empty());

        alice
            .client
            .send(&Envelope::broadcast("a".repeat(1000)))
            .unwrap();
        assert_eq!(next_chat(&mut alice.client).await.kind(), EnvelopeKind::Broadcast);
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let store = store();
        let config = HubConfig {
            max_frame_bytes: 128,
            ..HubConfig::default()
        };
        let hub = hub_with(&store, config);
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        alice.client.send(&Envelope::broadcast("x".repeat(200))).unwrap();
        match next_chat(&mut alice.client).await {
            Envelope::Error(notice) => assert_eq!(notice.kind, ErrorKind::Validation),
            other => panic!("Expected error, got {:?}", other),
        }
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_binary_frames_are_accepted() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        let frame = codec::encode(&Envelope::broadcast("packed")).unwrap();
        alice.client.send_binary(frame).unwrap();

        let received = next_chat(&mut alice.client).await;
        assert_eq!(
            received.as_chat().and_then(|m| m.content.as_deref()),
            Some("packed")
        );
    }

    #[tokio::test]
    async fn test_seen_receipt_notifies_sender() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        let mut bob = open(&hub, "bob", "bob-token");
        wait_connected(&hub, "alice").await;
        wait_connected(&hub, "bob").await;

        alice.client.send(&Envelope::direct("bob", "read me")).unwrap();
        let id = next_chat(&mut bob.client)
            .await
            .as_chat()
            .and_then(|m| m.id)
            .unwrap();
        next_chat(&mut alice.client).await;
        next_chat(&mut alice.client).await;

        bob.client
            .send(&Envelope::message_status(id, DeliveryStatus::Seen))
            .unwrap();
        assert_eq!(
            next_chat(&mut alice.client).await,
            Envelope::message_status(id, DeliveryStatus::Seen)
        );
        assert!(store.messages()[0].is_read);

        bob.client
            .send(&Envelope::message_status(99, DeliveryStatus::Delivered))
            .unwrap();
        // Bob still has a pending preview from the first message.
        assert_eq!(
            next_chat(&mut bob.client).await.kind(),
            EnvelopeKind::ChatPreviewUpdate
        );
        assert_eq!(
            next_chat(&mut bob.client).await,
            Envelope::error(ErrorKind::NotFound, "Message 99 not found")
        );
    }

    #[tokio::test]
    async fn test_store_failure_reports_internal_error() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        // One open for the activity refresh, one for routing.
        store.fail_next_opens(2);
        alice.client.send(&Envelope::broadcast("lost")).unwrap();
        assert_eq!(
            next_chat(&mut alice.client).await,
            Envelope::error(ErrorKind::Internal, "Failed to process message")
        );

        alice.client.send(&Envelope::broadcast("kept")).unwrap();
        assert_eq!(next_chat(&mut alice.client).await.kind(), EnvelopeKind::Broadcast);
    }

    #[tokio::test]
    async fn test_heartbeat_frame_touches_last_active() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        let stale = chrono::Utc::now() - chrono::Duration::minutes(30);
        store.set_presence("alice", true, Some(stale));

        alice.client.send(&Envelope::Heartbeat).unwrap();
        tokio::time::timeout(WAIT, async {
            while store.presence("alice").and_then(|p| p.last_active) == Some(stale) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("last_active refreshed");
    }

    #[tokio::test]
    async fn test_chat_activity_keeps_user_online_through_sweep() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        let stale = chrono::Utc::now() - chrono::Duration::minutes(10);
        store.set_presence("alice", true, Some(stale));

        alice.client.send(&Envelope::broadcast("still here")).unwrap();
        assert_eq!(next_chat(&mut alice.client).await.kind(), EnvelopeKind::Broadcast);

        let report = hub.liveness_monitor().sweep_once(chrono::Utc::now()).await.unwrap();
        assert!(report.demoted.is_empty());
        assert!(hub.is_connected("alice"));
        assert!(store.presence("alice").unwrap().online);
        assert!(!hub.registry().lookup("alice").unwrap().is_closed());
    }

    #[tokio::test]
    async fn test_unknown_frame_counts_as_activity() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        let stale = chrono::Utc::now() - chrono::Duration::minutes(10);
        store.set_presence("alice", true, Some(stale));

        alice.client.send_text(r#"{"type":"typing","to":"bob"}"#).unwrap();
        tokio::time::timeout(WAIT, async {
            while store.presence("alice").and_then(|p| p.last_active) == Some(stale) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("last_active refreshed");
    }

    #[tokio::test]
    async fn test_logout_closes_session() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        wait_connected(&hub, "alice").await;

        assert!(hub.logout("alice").await.unwrap().is_changed());
        assert_eq!(alice.task.await.unwrap().unwrap(), SessionEnd::Cancelled);

        while alice.client.recv_timeout(WAIT).await.is_some() {}
        assert_eq!(
            alice.client.close_reason().map(|r| r.reason.as_str()),
            Some("logged out")
        );
        assert!(!store.presence("alice").unwrap().online);
    }

    #[tokio::test]
    async fn test_notice_multicast_to_followers() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut bob = open(&hub, "bob", "bob-token");
        wait_connected(&hub, "bob").await;

        let post = Envelope::NoticePost(NoticePost {
            board: "general".into(),
            title: "Fire drill".into(),
            description: None,
            attachment_path: None,
            posted_by: "alice".into(),
            timestamp: None,
        });
        let report = hub.multicast(["bob", "carol"], post);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.not_connected, 1);
        let received = next_chat(&mut bob.client).await;
        assert_eq!(received.kind(), EnvelopeKind::NoticePost);
        assert!(received.timestamp().is_some());
    }

    #[tokio::test]
    async fn test_server_only_kinds_from_client_are_ignored() {
        let store = store();
        let hub = hub_with(&store, HubConfig::default());
        let mut alice = open(&hub, "alice", "alice-token");
        let mut bob = open(&hub, "bob", "bob-token");
        wait_connected(&hub, "alice").await;
        wait_connected(&hub, "bob").await;

        alice
            .client
            .send(&Envelope::status("bob", PresenceStatus::Offline))
            .unwrap();
        alice.client.send(&Envelope::broadcast("after")).unwrap();

        let received = next_chat(&mut bob.client).await;
        assert_eq!(received.kind(), EnvelopeKind::Broadcast);
        assert!(store.presence("bob").unwrap().online);
    }
}
