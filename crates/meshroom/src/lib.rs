//! # Meshroom
//!
//! Serverless game rooms over a peer-to-peer broadcast mesh.
//!
//! There is no server. Every device runs the same node; the peers agree
//! on a host by a deterministic rule (smallest canonical id wins), the
//! host drives the game, and everyone else mirrors its state. When the
//! host disappears or goes quiet, the remaining peers elect a new one.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshroom::prelude::*;
//!
//! # async fn run() -> Result<(), MeshroomError> {
//! let mesh = LocalMesh::new();
//! let mut alice = MeshNode::builder().build_local(&mesh, "alice");
//! let bob = MeshNode::builder().build_local(&mesh, "bob");
//!
//! alice.join("kitchen", "Alice").await?;
//! bob.join("kitchen", "Bob").await?;
//!
//! let mut events = alice.take_events().expect("first call");
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod error;
pub mod identity;
mod node;

pub use error::MeshroomError;
pub use node::{MeshNode, MeshNodeBuilder, WireFormat};

pub use meshroom_peer as peer;
pub use meshroom_protocol as protocol;
pub use meshroom_room as room;
pub use meshroom_tick as tick;
pub use meshroom_transport as transport;

/// Installs a `tracing` subscriber that honours `RUST_LOG`, falling back
/// to `info` for Meshroom and `warn` for everything else.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,meshroom=info,meshroom_room=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

pub mod prelude {
    pub use crate::{MeshNode, MeshNodeBuilder, MeshroomError, WireFormat};
    pub use meshroom_protocol::{PeerId, Phase, PlayerRecord};
    pub use meshroom_room::{
        GameRules, NoRules, RoomConfig, RoomError, RoomEvent, RoomHandle, RoomView,
    };
    pub use meshroom_transport::{LocalMesh, Transport};
}
