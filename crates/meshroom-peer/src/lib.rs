//! Peer bookkeeping for Meshroom.
//!
//! This crate answers three questions every node asks continuously:
//!
//! 1. **Who is around?** The [`PeerDirectory`] tracks reachable peers
//!    and lets disconnected ones linger for a grace period before they
//!    are dropped for good.
//! 2. **Have I seen this already?** The [`MessageDeduplicator`] admits
//!    each message identity once per TTL window.
//! 3. **Who is in charge?** The [`ElectionCoordinator`] picks a host
//!    deterministically, resolves two-hosts-at-once situations, and
//!    re-elects when the host goes quiet.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← owns one of each inside its actor task
//!     ↕
//! Peer Layer (this crate)  ← identity ordering, liveness, dedup
//!     ↕
//! Protocol Layer (below)  ← provides PeerId, CanonicalId
//! ```
//!
//! All time-dependent operations take `now: Instant` explicitly
//! (`tokio::time::Instant`), so callers decide the clock and tests can
//! run under paused time.

mod dedup;
mod directory;
mod election;
mod error;

pub use dedup::{DedupConfig, MessageDeduplicator};
pub use directory::{DirectoryConfig, PeerDirectory, PeerEntry, PeerState};
pub use election::{
    ElectionConfig, ElectionCoordinator, ElectionOutcome, ElectionRecord,
    Role, elect_host, is_self_host,
};
pub use error::PeerError;
