//! Codec trait and implementations for turning [`GameMessage`]s into bytes.
//!
//! A "codec" (coder/decoder) converts between Rust types and raw bytes.
//! The room layer doesn't care HOW a message is serialized; it holds
//! something that implements [`Codec`] and calls it.
//!
//! [`BinaryCodec`] is the interoperable wire format every peer speaks.
//! [`JsonCodec`] (behind the `json` feature) produces a human-readable
//! rendering of the same messages for logs, tooling, and rooms where
//! every peer opts into it.

use crate::{GameMessage, ProtocolError, wire};

/// A codec that can encode a [`GameMessage`] to bytes and decode it back.
///
/// `Send + Sync + 'static` so one codec can be shared by the room actor
/// and the broadcast gate, which run as separate Tokio tasks.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a message into a frame.
    ///
    /// # Errors
    /// Fails if a field doesn't fit its wire width (a 300-byte name,
    /// a drawn number above 255 inside a snapshot).
    fn encode(&self, msg: &GameMessage) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a frame.
    ///
    /// # Errors
    /// Fails on truncated, malformed or over-long input. Never panics
    /// and never reads outside `data`.
    fn decode(&self, data: &[u8]) -> Result<GameMessage, ProtocolError>;
}

// ---------------------------------------------------------------------------
// BinaryCodec
// ---------------------------------------------------------------------------

/// The length-prefixed little-endian wire format (see [`crate::wire`]).
///
/// ## Example
///
/// ```rust
/// use meshroom_protocol::{BinaryCodec, Codec, GameMessage, MessageBody, PeerId};
///
/// let codec = BinaryCodec;
/// let msg = GameMessage::new(
///     PeerId::new("alice"),
///     "Alice",
///     "room-1",
///     MessageBody::NumberDrawn { number: 42 },
/// );
///
/// let bytes = codec.encode(&msg).unwrap();
/// let decoded = codec.decode(&bytes).unwrap();
/// assert_eq!(msg, decoded);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn encode(&self, msg: &GameMessage) -> Result<Vec<u8>, ProtocolError> {
        wire::encode_message(msg)
    }

    fn decode(&self, data: &[u8]) -> Result<GameMessage, ProtocolError> {
        wire::decode_message(data)
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Handy for reading traffic while debugging. A room can run on it if
/// every peer does; frames are several times larger than
/// [`BinaryCodec`]'s and the two don't interoperate.
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode(&self, msg: &GameMessage) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(msg).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<GameMessage, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}
