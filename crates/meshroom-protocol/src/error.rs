//! Error types for the protocol layer.
//!
//! Each crate in Meshroom defines its own error enum. When you see a
//! `ProtocolError`, the problem is in turning a [`GameMessage`] into
//! bytes or back, not in the transport or the room.
//!
//! [`GameMessage`]: crate::GameMessage

/// Errors that can occur while encoding or decoding wire frames.
///
/// Decode errors are never fatal for a node: the inbound pipeline logs
/// them and drops the offending frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer ended before a field could be read.
    ///
    /// `needed` is the number of bytes the field required, `remaining`
    /// what was left in the buffer at that point.
    #[error("truncated frame while reading {field}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// A string or blob is longer than its length prefix can express.
    #[error("{field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// A numeric value does not fit the width the wire format gives it.
    #[error("{field} value {value} out of range")]
    ValueOutOfRange { field: &'static str, value: i64 },

    /// Bytes were left over after a complete frame was read.
    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    /// The frame is structurally readable but violates protocol rules
    /// (unknown phase byte, negative drawn number, ...).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// JSON serialization failed (debug codec only).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// JSON deserialization failed (debug codec only).
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
