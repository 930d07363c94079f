//! Room engine for Meshroom.
//!
//! Each node runs one room actor (a Tokio task) that owns the replicated
//! room state, takes part in host election, and, while host, drives the
//! game: countdown, draws, turn rotation, winner detection and reset.
//!
//! # Key types
//!
//! - [`spawn_room`]: starts the actor for one node
//! - [`RoomHandle`]: send commands to a running room actor
//! - [`RoomEvent`]: what the actor tells the UI
//! - [`RoomState`]: the local mirror of the room, and how it merges
//! - [`BroadcastGate`]: readiness, authority, cooldown and retry for sends
//! - [`GameRules`]: the hook where card rules plug in
//! - [`RoomConfig`]: game constants and timer intervals

mod config;
mod error;
mod gate;
mod logic;
mod room;
mod state;

pub use config::RoomConfig;
pub use error::{GateError, RoomError};
pub use gate::{BroadcastGate, GateConfig, is_emergency};
pub use logic::{GameRules, NoRules};
pub use room::{RoomEvent, RoomHandle, RoomView, spawn_room};
pub use state::{MergeOutcome, RoomState, SnapshotChanges};
