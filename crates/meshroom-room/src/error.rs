//! Error types for the room layer.

use std::time::Duration;

use meshroom_protocol::{MessageKind, ProtocolError};

/// Why the broadcast gate refused or failed to send a message.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The transport's network is down. Zero connected peers is fine;
    /// a stopped network is not.
    #[error("network unavailable")]
    NetworkUnavailable,

    /// A host-only message was offered while this node isn't host.
    #[error("{0:?} may only be sent by the host")]
    NotHost(MessageKind),

    /// The same kind was sent too recently.
    #[error("{kind:?} is cooling down ({remaining:?} left)")]
    Cooldown {
        kind: MessageKind,
        remaining: Duration,
    },

    /// Every transmit attempt failed.
    #[error("broadcast failed after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// The message couldn't be encoded (a field too long for the wire).
    #[error(transparent)]
    Encode(#[from] ProtocolError),

    /// The room was torn down while the send was pending.
    #[error("send cancelled")]
    Cancelled,
}

/// Errors returned to callers of [`RoomHandle`](crate::RoomHandle).
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The operation needs a joined room.
    #[error("not in a room")]
    NotJoined,

    /// `join` was called while already in a room.
    #[error("already in room {0}")]
    AlreadyJoined(String),

    /// The operation is reserved for the host.
    #[error("only the host can do that")]
    NotHost,

    /// The room's phase (or player count) doesn't allow this operation.
    #[error("invalid room state for this operation: {0}")]
    InvalidState(String),

    /// The transport refused to start.
    #[error("network error: {0}")]
    Network(String),

    /// The room actor is gone (shut down or dropped).
    #[error("room is unavailable")]
    Unavailable,

    /// A user-initiated broadcast failed.
    #[error(transparent)]
    Gate(#[from] GateError),
}
