//! Transport abstraction layer for Meshroom.
//!
//! The sync engine never manages radios or sockets itself. It consumes a
//! [`Transport`]: something that can be started and stopped, report which
//! peers are reachable, broadcast a frame to all of them, and deliver
//! [`TransportEvent`]s (frames in, peers coming and going).
//!
//! [`LocalMesh`] is an in-memory implementation where every started
//! endpoint hears every other one. It supports cutting individual links,
//! injecting send failures and duplicating deliveries, which is what the
//! multi-node tests and the `bingo-sim` demo run on.

mod error;
mod mesh;

pub use error::TransportError;
pub use mesh::{LocalMesh, LocalTransport};
pub use meshroom_protocol::PeerId;

use std::future::Future;

use tokio::sync::mpsc;

/// Delivery hint passed along with a broadcast.
///
/// Broadcast media typically offer a cheap best-effort mode and a mode
/// with link-level acknowledgements. The core asks for `Reliable` for
/// state it can't afford to lose (snapshots, draws) and `Unreliable`
/// for periodic chatter (heartbeats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageClass {
    #[default]
    Reliable,
    Unreliable,
}

/// Something that happened on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived from `from`.
    MessageReceived { from: PeerId, bytes: Vec<u8> },
    /// A peer became reachable.
    PeerConnected(PeerId),
    /// A peer stopped being reachable.
    PeerDisconnected(PeerId),
}

/// A broadcast-style peer transport.
///
/// The connection set is owned by the transport; callers only query it
/// and subscribe to changes. Methods returning futures are spelled as
/// `impl Future + Send` so callers can drive them from spawned tasks.
pub trait Transport: Send + Sync + 'static {
    /// The error type for transport operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Brings the network up. Idempotent.
    fn start_network(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Takes the network down. Idempotent.
    fn stop_network(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Returns `true` while the network is up.
    fn is_network_active(&self) -> bool;

    /// Peers currently reachable. May be empty (single-node mode).
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Sends `data` to every connected peer.
    fn broadcast(
        &self,
        data: &[u8],
        class: MessageClass,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// This node's identity as the transport knows it.
    fn local_peer_id(&self) -> PeerId;

    /// Registers a new event subscriber. Only events that happen after
    /// the call are delivered.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent>;
}
