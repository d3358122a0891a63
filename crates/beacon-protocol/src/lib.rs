//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon presence and fanout engine.
//!
//! This crate defines the envelope types exchanged between chat clients and
//! the server, the codecs used to put them on the wire, and the close codes
//! the server uses when it ends a connection.
//!
//! ## Envelope Kinds
//!
//! - `direct_message` / `group_message` / `broadcast` - Chat traffic
//! - `status` - A user went online or offline
//! - `message_status` - Delivery and read receipts
//! - `chat_preview_update` / `notice_post` - Derived notifications
//! - `heartbeat` / `error` - Keepalive and error reporting
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Decoded, Envelope};
//!
//! let envelope = Envelope::direct("bob", "Hello, Bob!");
//!
//! let text = codec::encode_json(&envelope).unwrap();
//! let decoded = codec::decode_json(&text).unwrap();
//! assert_eq!(decoded, Decoded::Envelope(envelope));
//! ```

pub mod close;
pub mod codec;
pub mod envelope;

pub use close::{CloseCode, CloseReason};
pub use codec::{decode, encode, Decoded, ProtocolError, WireFormat, WireFrame};
pub use envelope::{
    ChatMessage, ChatPreview, DeliveryStatus, Envelope, EnvelopeKind, ErrorKind, ErrorNotice,
    MessageStatusUpdate, NoticePost, PresenceStatus, StatusUpdate,
};
