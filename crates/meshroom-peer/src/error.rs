//! Error types for the peer layer.

use meshroom_protocol::PeerId;

/// Errors that can occur in peer bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// No directory entry exists for the given peer.
    #[error("peer {0} is not in the directory")]
    NotFound(PeerId),

    /// A peer asserted a host that orders after the one we believe in.
    ///
    /// Never surfaced to users. The room layer logs it and drops the
    /// asserting message; the larger host will demote itself once it
    /// hears from the smaller one.
    #[error("host assertion {asserted} conflicts with believed host {believed}")]
    ElectionConflict { believed: PeerId, asserted: PeerId },
}
