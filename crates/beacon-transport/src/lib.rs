//! # beacon-transport
//!
//! Transport abstraction layer for the Beacon presence engine.
//!
//! This crate provides:
//!
//! - **Traits** - `FrameSource` / `FrameSink`, the two halves of a connection
//! - **Outbound** - the per-connection queue and writer task that every
//!   delivery goes through
//! - **WebSocket** - adapter for upgraded axum WebSockets
//! - **Memory** - loopback transport for tests and embedding
//!
//! ```rust,ignore
//! use beacon_transport::{outbound, ConnectionId};
//!
//! let (handle, queue) = outbound::channel(ConnectionId::generate(), 1024);
//! let writer = outbound::spawn_writer(queue, sink, WireFormat::Json);
//! handle.send(Arc::new(Envelope::Heartbeat))?;
//! ```

pub mod memory;
pub mod outbound;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use outbound::{Outbound, OutboundHandle, OutboundQueue};
pub use traits::{ConnectionId, FrameSink, FrameSource, TransportError};
