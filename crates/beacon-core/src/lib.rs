//! # beacon-core
//!
//! Connection registry, presence lifecycle and message fanout for the
//! Beacon presence engine.
//!
//! This crate provides:
//!
//! - **Registry** - identity to live outbound channel
//! - **Presence** - online/offline transitions and status broadcasts
//! - **Router** - direct, group, broadcast and multicast fanout
//! - **Liveness** - per-connection heartbeats and the staleness sweep
//! - **Dispatcher** - the per-connection receive loop
//! - **Hub** - the facade tying them together
//!
//! Users, groups and messages live behind the [`Store`] trait; tokens are
//! checked by an [`Authenticator`]. [`MemoryStore`] is an in-process store
//! for development and tests.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Dispatcher  │────▶│   Router    │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲                   ▲
//!        ▼                   │                   │
//! ┌─────────────┐     ┌─────────────┐            │
//! │    Store    │◀────│  Presence   │────────────┘
//! └─────────────┘     └─────────────┘
//!                            ▲
//!                     ┌─────────────┐
//!                     │  Liveness   │
//!                     └─────────────┘
//! ```

pub mod auth;
pub mod dispatcher;
pub mod hub;
pub mod liveness;
pub mod memory;
pub mod presence;
pub mod registry;
pub mod router;
pub mod store;

pub use auth::{AuthError, Authenticator, StaticTokens};
pub use dispatcher::{DispatchError, Dispatcher, SessionEnd, ValidationError};
pub use hub::{ConnectError, ConnectionTicket, Hub, HubConfig};
pub use liveness::{LivenessConfig, LivenessMonitor, SweepReport};
pub use memory::MemoryStore;
pub use presence::{OfflineCause, PresenceLifecycle};
pub use registry::ConnectionRegistry;
pub use router::{Delivery, DeliveryError, FanoutReport, FanoutRouter, RouteError, RouteOutcome};
pub use store::{
    Group, MessageId, MessageTarget, NewMessage, PresenceChange, PresenceState, Store, StoreError,
    StoreProvider, StoredMessage, User,
};
