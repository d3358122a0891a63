//! Connection registry.
//!
//! Maps a user identity to the single live outbound channel for that user.

use beacon_transport::{ConnectionId, OutboundHandle};
use dashmap::DashMap;
use std::collections::BTreeSet;
use tracing::debug;

/// Identity to live channel map.
///
/// Backed by a sharded concurrent map: operations on one identity are
/// serialized, and the last write for an identity wins.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, OutboundHandle>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel for an identity.
    ///
    /// Returns the channel it replaced, if any. The caller decides what to do
    /// with it.
    pub fn register(&self, identity: &str, handle: OutboundHandle) -> Option<OutboundHandle> {
        let connection = handle.id().clone();
        let previous = self.connections.insert(identity.to_string(), handle);

        debug!(
            identity = %identity,
            connection = %connection,
            replaced = previous.is_some(),
            "Registered connection"
        );
        previous
    }

    /// Remove the entry for an identity, whichever connection it belongs to.
    pub fn unregister(&self, identity: &str) -> Option<OutboundHandle> {
        let removed = self.connections.remove(identity).map(|(_, handle)| handle);
        if let Some(handle) = &removed {
            debug!(identity = %identity, connection = %handle.id(), "Unregistered connection");
        }
        removed
    }

    /// Remove the entry for an identity only if it still belongs to
    /// `connection`.
    ///
    /// Returns `true` if the entry was removed.
    pub fn unregister_connection(&self, identity: &str, connection: &ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(identity, |_, handle| handle.id() == connection)
            .is_some();

        if removed {
            debug!(identity = %identity, connection = %connection, "Unregistered connection");
        } else {
            debug!(
                identity = %identity,
                connection = %connection,
                "Connection no longer current, registry unchanged"
            );
        }
        removed
    }

    /// Get the live channel for an identity.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<OutboundHandle> {
        self.connections.get(identity).map(|entry| entry.clone())
    }

    /// Check whether an identity has a live channel.
    #[must_use]
    pub fn is_connected(&self, identity: &str) -> bool {
        self.connections.contains_key(identity)
    }

    /// Check whether `connection` is the registered channel for an identity.
    #[must_use]
    pub fn is_current(&self, identity: &str, connection: &ConnectionId) -> bool {
        self.connections
            .get(identity)
            .is_some_and(|entry| entry.id() == connection)
    }

    /// Identities with a live channel.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    /// Live channels, paired with their identity.
    #[must_use]
    pub fn handles(&self) -> Vec<(String, OutboundHandle)> {
        self.connections
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Number of connected identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
