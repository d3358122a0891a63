//! Codec for encoding and decoding Beacon envelopes.
//!
//! Two encodings share the same field names:
//! - JSON, carried in WebSocket text frames.
//! - MessagePack with a 4-byte big-endian length prefix, carried in binary frames.
//!
//! Decoding goes through a generic value first so that an unrecognized `type`
//! tag can be reported as [`Decoded::Unknown`] instead of a hard error.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeKind};

/// Maximum binary frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame has no `type` tag.
    #[error("Missing type tag")]
    MissingType,

    /// Invalid frame data.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Outbound encoding negotiated per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// JSON text frames.
    #[default]
    Json,
    /// Length-prefixed MessagePack binary frames.
    #[serde(alias = "messagepack")]
    Msgpack,
}

/// A raw frame as carried by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Binary(Bytes),
}

impl WireFrame {
    /// Size of the frame payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            WireFrame::Text(text) => text.len(),
            WireFrame::Binary(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A recognized envelope.
    Envelope(Envelope),
    /// A well-formed frame with a tag this server does not know.
    Unknown(String),
}

/// Encode an envelope as length-prefixed MessagePack.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded envelope (named fields)
///
/// # Errors
///
/// Returns an error if the envelope is too large or encoding fails.
pub fn encode(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(envelope)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(buf.freeze())
}

/// Decode a single length-prefixed MessagePack frame.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, has trailing bytes,
/// or does not describe an envelope.
pub fn decode(data: &[u8]) -> Result<Decoded, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }
    if data.len() > total_size {
        return Err(ProtocolError::Invalid(format!(
            "{} trailing bytes after frame",
            data.len() - total_size
        )));
    }

    let value: serde_json::Value = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    classify(value)
}

/// Encode an envelope as JSON text.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode a JSON text frame.
///
/// # Errors
///
/// Returns an error if the text is not a JSON object with a valid envelope body.
pub fn decode_json(text: &str) -> Result<Decoded, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    classify(value)
}

/// Encode an envelope into a transport frame using the given format.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn encode_frame(format: WireFormat, envelope: &Envelope) -> Result<WireFrame, ProtocolError> {
    match format {
        WireFormat::Json => encode_json(envelope).map(WireFrame::Text),
        WireFormat::Msgpack => encode(envelope).map(WireFrame::Binary),
    }
}

/// Decode a transport frame, picking the encoding from the frame type.
///
/// # Errors
///
/// Returns an error if the frame is malformed.
pub fn decode_frame(frame: &WireFrame) -> Result<Decoded, ProtocolError> {
    match frame {
        WireFrame::Text(text) => decode_json(text),
        WireFrame::Binary(data) => decode(data),
    }
}

/// Classify a generic value by its `type` tag.
fn classify(value: serde_json::Value) -> Result<Decoded, ProtocolError> {
    let tag = match &value {
        serde_json::Value::Object(map) => match map.get("type") {
            Some(serde_json::Value::String(tag)) => tag.clone(),
            Some(_) => return Err(ProtocolError::Invalid("type tag must be a string".into())),
            None => return Err(ProtocolError::MissingType),
        },
        _ => return Err(ProtocolError::Invalid("frame must be an object".into())),
    };

    if EnvelopeKind::from_tag(&tag).is_none() {
        return Ok(Decoded::Unknown(tag));
    }

    let envelope = serde_json::from_value(value)?;
    Ok(Decoded::Envelope(envelope))
}
