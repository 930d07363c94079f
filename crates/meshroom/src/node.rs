//! `MeshNode` builder: the entry point for running one peer.
//!
//! Ties the layers together: a transport, a wire codec, the game rules
//! and a [`RoomConfig`] go in; a running room actor comes out.

use std::path::Path;
use std::sync::Arc;

use meshroom_protocol::{BinaryCodec, JsonCodec, PeerId};
use meshroom_room::{GameRules, NoRules, RoomConfig, RoomEvent, RoomHandle, spawn_room};
use meshroom_transport::{LocalMesh, Transport};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{MeshroomError, identity};

/// Which codec frames go out in. Every peer in a room must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WireFormat {
    /// Compact tagged binary frames.
    #[default]
    Binary,
    /// JSON frames. Larger, but readable in a packet capture.
    Json,
}

/// Builder for a [`MeshNode`].
///
/// # Example
///
/// ```rust,no_run
/// use meshroom::prelude::*;
///
/// # async fn run() -> Result<(), MeshroomError> {
/// let mesh = LocalMesh::new();
/// let node = MeshNode::builder()
///     .config(RoomConfig { min_players: 3, ..RoomConfig::default() })
///     .build_local(&mesh, "alpha");
/// node.join("kitchen", "Alice").await?;
/// # Ok(())
/// # }
/// ```
pub struct MeshNodeBuilder<R: GameRules = NoRules> {
    config: RoomConfig,
    rules: R,
    wire: WireFormat,
}

impl MeshNodeBuilder<NoRules> {
    /// A builder with default config, binary frames and no card rules.
    pub fn new() -> Self {
        Self {
            config: RoomConfig::default(),
            rules: NoRules,
            wire: WireFormat::Binary,
        }
    }
}

impl Default for MeshNodeBuilder<NoRules> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: GameRules> MeshNodeBuilder<R> {
    /// Sets the room configuration. It is validated when the node starts.
    pub fn config(mut self, config: RoomConfig) -> Self {
        self.config = config;
        self
    }

    /// Reads the room configuration from a JSON file. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    /// [`MeshroomError::Config`] if the file can't be read,
    /// [`MeshroomError::Format`] if it doesn't parse.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self, MeshroomError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| MeshroomError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        self.config = serde_json::from_slice(&bytes).map_err(|source| MeshroomError::Format {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self)
    }

    /// Plugs in the local player's card rules.
    pub fn rules<R2: GameRules>(self, rules: R2) -> MeshNodeBuilder<R2> {
        MeshNodeBuilder {
            config: self.config,
            rules,
            wire: self.wire,
        }
    }

    pub fn wire_format(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }

    /// Starts the node on `transport`. Must be called inside a Tokio
    /// runtime. The network isn't started until the first join.
    pub fn build<T: Transport>(self, transport: Arc<T>) -> MeshNode {
        let id = transport.local_peer_id();
        let (handle, events) = match self.wire {
            WireFormat::Binary => spawn_room(transport, BinaryCodec, self.rules, self.config),
            WireFormat::Json => spawn_room(transport, JsonCodec, self.rules, self.config),
        };
        tracing::info!(peer_id = %id, wire = ?self.wire, "mesh node started");
        MeshNode {
            id,
            handle,
            events: Some(events),
        }
    }

    /// Starts the node as endpoint `id` on an in-memory mesh.
    pub fn build_local(self, mesh: &LocalMesh, id: impl Into<PeerId>) -> MeshNode {
        self.build(Arc::new(mesh.endpoint(id)))
    }

    /// Like [`build_local`](Self::build_local), with the id loaded from
    /// (or created in) an identity file.
    ///
    /// # Errors
    /// See [`identity::load_or_create`].
    pub fn build_local_with_identity(
        self,
        mesh: &LocalMesh,
        identity_path: impl AsRef<Path>,
    ) -> Result<MeshNode, MeshroomError> {
        let id = identity::load_or_create(identity_path)?;
        Ok(self.build_local(mesh, id))
    }
}

/// One running peer.
///
/// Derefs to its [`RoomHandle`], so room commands can be called on the
/// node directly.
pub struct MeshNode {
    id: PeerId,
    handle: RoomHandle,
    events: Option<mpsc::UnboundedReceiver<RoomEvent>>,
}

impl MeshNode {
    /// Creates a new builder.
    pub fn builder() -> MeshNodeBuilder<NoRules> {
        MeshNodeBuilder::new()
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// A clonable handle for other tasks.
    pub fn handle(&self) -> RoomHandle {
        self.handle.clone()
    }

    /// Takes the event stream. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<RoomEvent>> {
        self.events.take()
    }
}

impl std::ops::Deref for MeshNode {
    type Target = RoomHandle;

    fn deref(&self) -> &RoomHandle {
        &self.handle
    }
}
