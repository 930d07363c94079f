//! Wire protocol for Meshroom.
//!
//! This crate defines the "language" that peers in a room speak:
//!
//! - **Types** ([`GameMessage`], [`MessageBody`], [`RoomSnapshot`],
//!   [`PeerId`], etc.): the message structures that travel on the air.
//! - **Codec** ([`Codec`] trait, [`BinaryCodec`], [`JsonCodec`]): how
//!   those messages are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]): what can go wrong during
//!   encoding/decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between the transport (raw bytes) and the
//! room (shared state). It knows nothing about peers coming and going or
//! who is host, only how to serialize and deserialize messages.
//!
//! ```text
//! Transport (bytes) → Protocol (GameMessage) → Room (RoomState)
//! ```

mod codec;
mod error;
mod types;
pub mod wire;

pub use codec::{BinaryCodec, Codec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    CanonicalId, GameMessage, MessageBody, MessageKind, PeerId, Phase,
    PlayerRecord, RoomSnapshot, unix_millis,
};
