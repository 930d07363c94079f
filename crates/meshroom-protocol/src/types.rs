//! Core protocol types for Meshroom's wire format.
//!
//! This module defines every type that travels "on the wire" between
//! peers: identities, player records, room snapshots, and the
//! [`GameMessage`] envelope that wraps them. The binary layout lives in
//! [`crate::wire`]; these are the Rust-side shapes.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Scheme prefix some transports prepend to peer identifiers.
const PEER_SCHEME: &str = "peer:";

/// An opaque, stable identifier for a device.
///
/// A newtype over `String` so it can't be confused with a room id or a
/// display name. Transports may decorate identifiers (`peer:` scheme,
/// `@ble` suffix); any ordering comparison must go through
/// [`PeerId::canonical`] instead of comparing the raw strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps a raw identifier as received from a transport or the wire.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier (`peer-` followed by 16 hex chars).
    pub fn random() -> Self {
        Self(format!("peer-{}", random_hex(8)))
    }

    /// Returns the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the identifier is empty (no peer).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Normalizes the identifier for ordering comparisons.
    ///
    /// Trims whitespace, strips a leading `peer:` scheme (any case) and
    /// a trailing `@<transport-tag>` suffix. Two ids that differ only in
    /// that decoration compare equal. An id that is nothing but a suffix
    /// keeps it, so a non-empty id never canonicalizes to empty.
    pub fn canonical(&self) -> CanonicalId {
        let mut id = self.0.trim();
        if id.len() >= PEER_SCHEME.len()
            && id.is_char_boundary(PEER_SCHEME.len())
            && id[..PEER_SCHEME.len()].eq_ignore_ascii_case(PEER_SCHEME)
        {
            id = id[PEER_SCHEME.len()..].trim_start();
        }
        if let Some(at) = id.rfind('@').filter(|&at| at > 0) {
            id = &id[..at];
        }
        CanonicalId(id.trim().to_string())
    }

    /// Returns `true` if both ids name the same device after normalization.
    pub fn same_peer(&self, other: &PeerId) -> bool {
        self.canonical() == other.canonical()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A peer identifier in its normalized, totally ordered form.
///
/// Only produced by [`PeerId::canonical`]. `Ord` is plain lexicographic
/// byte order, which every peer computes identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The lifecycle phase of a room.
///
/// Transitions form a cycle, no skipping:
///
/// ```text
/// Waiting → Countdown → Playing → Finished → Waiting
/// ```
///
/// Only the host drives transitions; followers copy whatever phase the
/// host broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Waiting,
    Countdown,
    Playing,
    Finished,
}

impl Phase {
    /// The phase that follows this one in the cycle.
    pub fn next(self) -> Self {
        match self {
            Self::Waiting => Self::Countdown,
            Self::Countdown => Self::Playing,
            Self::Playing => Self::Finished,
            Self::Finished => Self::Waiting,
        }
    }

    /// Returns `true` if transitioning to `target` is a legal single step.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == target
    }

    /// Returns `true` while a round is running (countdown or playing).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Countdown | Self::Playing)
    }

    /// Wire byte for this phase.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Countdown => 1,
            Self::Playing => 2,
            Self::Finished => 3,
        }
    }

    /// Parses a wire byte. Returns `None` for unknown values.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Waiting),
            1 => Some(Self::Countdown),
            2 => Some(Self::Playing),
            3 => Some(Self::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::Countdown => write!(f, "Countdown"),
            Self::Playing => write!(f, "Playing"),
            Self::Finished => write!(f, "Finished"),
        }
    }
}

// ---------------------------------------------------------------------------
// Room data
// ---------------------------------------------------------------------------

/// One player as seen by the room.
///
/// Unique by `id`. `name` is display-only and may repeat across players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PeerId,
    pub name: String,
    /// Lines completed on this player's card, as reported by the game rules.
    pub completed_lines: u8,
    pub has_won: bool,
    pub connected: bool,
}

impl PlayerRecord {
    /// A freshly joined, connected player with no progress.
    pub fn new(id: PeerId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            completed_lines: 0,
            has_won: false,
            connected: true,
        }
    }
}

/// The full authoritative room state, as broadcast by the host.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    /// Host asserted by the sender. `None` is encoded as an empty string.
    pub host_id: Option<PeerId>,
    pub players: Vec<PlayerRecord>,
    pub phase: Phase,
    /// Drawn numbers in draw order. Encoded one byte each.
    pub drawn: Vec<u16>,
    pub current: Option<u16>,
    pub countdown: u8,
}

// ---------------------------------------------------------------------------
// Message kinds
// ---------------------------------------------------------------------------

/// The type tag of a message, without its data.
///
/// Used as a key for per-type cooldowns and for host-only gating, where
/// only the kind matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    PlayerJoined,
    PlayerLeft,
    RoomSnapshot,
    NumberDrawn,
    Heartbeat,
    TurnChange,
    GameStart,
    CountdownTick,
    PlayerProgress,
    GameWon,
    GameReset,
    Chat,
    Emote,
    Raw,
    Unknown(u8),
}

impl MessageKind {
    /// The 1-byte wire tag.
    pub fn tag(self) -> u8 {
        match self {
            Self::PlayerJoined => 0x01,
            Self::PlayerLeft => 0x02,
            Self::RoomSnapshot => 0x03,
            Self::NumberDrawn => 0x04,
            Self::Heartbeat => 0x05,
            Self::TurnChange => 0x06,
            Self::GameStart => 0x07,
            Self::CountdownTick => 0x08,
            Self::PlayerProgress => 0x09,
            Self::GameWon => 0x0A,
            Self::GameReset => 0x0B,
            Self::Chat => 0x0C,
            Self::Emote => 0x0D,
            Self::Raw => 0x0E,
            Self::Unknown(tag) => tag,
        }
    }

    /// Maps a wire tag to a kind. Never fails: unrecognised tags become
    /// [`MessageKind::Unknown`].
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0x01 => Self::PlayerJoined,
            0x02 => Self::PlayerLeft,
            0x03 => Self::RoomSnapshot,
            0x04 => Self::NumberDrawn,
            0x05 => Self::Heartbeat,
            0x06 => Self::TurnChange,
            0x07 => Self::GameStart,
            0x08 => Self::CountdownTick,
            0x09 => Self::PlayerProgress,
            0x0A => Self::GameWon,
            0x0B => Self::GameReset,
            0x0C => Self::Chat,
            0x0D => Self::Emote,
            0x0E => Self::Raw,
            other => Self::Unknown(other),
        }
    }

    /// Kinds that only the current host may broadcast.
    pub fn is_host_only(self) -> bool {
        matches!(
            self,
            Self::RoomSnapshot
                | Self::NumberDrawn
                | Self::TurnChange
                | Self::GameStart
                | Self::CountdownTick
                | Self::GameWon
                | Self::GameReset
        )
    }
}

// ---------------------------------------------------------------------------
// MessageBody: tagged union of every message
// ---------------------------------------------------------------------------

/// The typed content of a message.
///
/// One variant per wire tag. Decoding matches exhaustively on the tag;
/// tags this build doesn't know are preserved as [`MessageBody::Unknown`]
/// rather than rejected, so newer peers don't crash older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageBody {
    /// "I'm in the room."
    PlayerJoined { id: PeerId, name: String },

    /// "I'm leaving the room."
    PlayerLeft { id: PeerId },

    /// Host → all: the full room state.
    RoomSnapshot(RoomSnapshot),

    /// Host → all: a number was drawn. Encoded as a 4-byte integer so
    /// pools beyond 255 stay representable here.
    NumberDrawn { number: u16 },

    /// Periodic liveness signal. Never introduces a new player.
    Heartbeat { id: PeerId, name: String },

    /// Host → all: whose turn it is after the latest draw.
    TurnChange { next: PeerId, turn_index: u8 },

    /// Host → all: the countdown started.
    GameStart { countdown: u8 },

    /// Host → all: seconds left before play starts.
    CountdownTick { remaining: u8 },

    /// A player reporting its own progress.
    PlayerProgress {
        id: PeerId,
        completed_lines: u8,
        has_won: bool,
    },

    /// Host → all: someone reached the winning line count.
    GameWon { winner: PeerId, name: String },

    /// Host → all: back to the lobby.
    GameReset,

    /// Free text chat. Length-prefixed with 2 bytes.
    Chat { text: String },

    /// Short reaction code, e.g. `"wave"`.
    Emote { emote: String },

    /// Opaque application payload, 2-byte length prefix.
    Raw { data: Vec<u8> },

    /// A tag this build doesn't recognise; body kept verbatim.
    Unknown { tag: u8, body: Vec<u8> },
}

impl MessageBody {
    /// The kind (tag) of this body.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::PlayerJoined { .. } => MessageKind::PlayerJoined,
            Self::PlayerLeft { .. } => MessageKind::PlayerLeft,
            Self::RoomSnapshot(_) => MessageKind::RoomSnapshot,
            Self::NumberDrawn { .. } => MessageKind::NumberDrawn,
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
            Self::TurnChange { .. } => MessageKind::TurnChange,
            Self::GameStart { .. } => MessageKind::GameStart,
            Self::CountdownTick { .. } => MessageKind::CountdownTick,
            Self::PlayerProgress { .. } => MessageKind::PlayerProgress,
            Self::GameWon { .. } => MessageKind::GameWon,
            Self::GameReset => MessageKind::GameReset,
            Self::Chat { .. } => MessageKind::Chat,
            Self::Emote { .. } => MessageKind::Emote,
            Self::Raw { .. } => MessageKind::Raw,
            Self::Unknown { tag, .. } => MessageKind::Unknown(*tag),
        }
    }
}

// ---------------------------------------------------------------------------
// GameMessage: the envelope
// ---------------------------------------------------------------------------

/// The top-level message wrapper. Every frame on the wire is one of these.
///
/// ```text
/// ┌──────────────────────────────────┐
/// │ message_id: "9f2c..."            │  ← dedup identity
/// │ sender_id / sender_name          │  ← who sent it
/// │ room_id                          │  ← which room
/// │ timestamp: 1718000000000         │  ← sender clock, ms
/// │ ┌──────────────────────────────┐ │
/// │ │ body: NumberDrawn { 42 }     │ │  ← the content
/// │ └──────────────────────────────┘ │
/// └──────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMessage {
    /// Random per-message id. May be empty on frames from peers that
    /// don't assign one; see [`GameMessage::identity`].
    pub message_id: String,
    pub sender_id: PeerId,
    pub sender_name: String,
    pub room_id: String,
    /// Milliseconds since the Unix epoch on the sender's clock.
    pub timestamp: u64,
    pub body: MessageBody,
}

impl GameMessage {
    /// Builds a message with a fresh random id and the current time.
    pub fn new(
        sender_id: PeerId,
        sender_name: impl Into<String>,
        room_id: impl Into<String>,
        body: MessageBody,
    ) -> Self {
        Self {
            message_id: random_hex(8),
            sender_id,
            sender_name: sender_name.into(),
            room_id: room_id.into(),
            timestamp: unix_millis(),
            body,
        }
    }

    /// The kind of the wrapped body.
    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    /// The identity used for deduplication.
    ///
    /// `message_id` when present. Otherwise a BLAKE3 digest over the tag,
    /// sender, timestamp and encoded body, so two deliveries of the same
    /// frame still collapse to one identity.
    pub fn identity(&self) -> String {
        if !self.message_id.is_empty() {
            return self.message_id.clone();
        }
        let body = crate::wire::encode_body(&self.body).unwrap_or_default();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.kind().tag()]);
        hasher.update(self.sender_id.as_str().as_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(&body);
        let hash = hasher.finalize();
        format!("h:{}", &hash.to_hex()[..32])
    }
}

/// Milliseconds since the Unix epoch. Clocks before 1970 read as 0.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `bytes` random bytes rendered as lowercase hex.
fn random_hex(bytes: usize) -> String {
    let mut rng = rand::rng();
    (0..bytes)
        .map(|_| format!("{:02x}", rng.random::<u8>()))
        .collect()
}

// =========================================================================
// Tests
// =========================================================================
