//! The peer directory: who this node can currently hear.
//!
//! The transport owns the real connection set; the directory is the
//! room's own record of it, with one addition the transport doesn't
//! have: a grace period. A peer that drops off the air is marked
//! `Disconnected` rather than forgotten, so a brief radio hiccup doesn't
//! eject a player from a running game.
//!
//! ```text
//!   Connected ──(disconnect)──→ Disconnected ──(grace elapsed)──→ Expired
//!       ↑                            │
//!       └────────(connect)───────────┘
//! ```

use std::collections::HashMap;
use std::time::Duration;

use meshroom_protocol::PeerId;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::PeerError;

// ---------------------------------------------------------------------------
// DirectoryConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`PeerDirectory`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// How long a disconnected peer is kept before it expires.
    ///
    /// Default: 30 seconds. Zero expires on the next sweep.
    pub disconnect_grace: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// PeerState / PeerEntry
// ---------------------------------------------------------------------------

/// Where a peer is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connected,
    /// Dropped off at `since`. Comes back on `connect`, or expires.
    Disconnected { since: Instant },
    Expired,
}

/// One peer's directory record.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub id: PeerId,
    pub state: PeerState,
    /// Last time any traffic was attributed to this peer.
    pub last_seen: Instant,
}

impl PeerEntry {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, PeerState::Connected)
    }
}

// ---------------------------------------------------------------------------
// PeerDirectory
// ---------------------------------------------------------------------------

/// Registry of peers this node has heard of.
///
/// Owned by the room actor; not synchronized.
pub struct PeerDirectory {
    peers: HashMap<PeerId, PeerEntry>,
    config: DirectoryConfig,
}

impl PeerDirectory {
    pub fn new(config: DirectoryConfig) -> Self {
        Self {
            peers: HashMap::new(),
            config,
        }
    }

    /// Records that `id` is reachable.
    ///
    /// Returns `true` if this is a change (new peer, or one coming back
    /// from Disconnected/Expired), `false` if it was already connected.
    pub fn connect(&mut self, id: PeerId, now: Instant) -> bool {
        match self.peers.get_mut(&id) {
            Some(entry) if entry.is_connected() => {
                entry.last_seen = now;
                false
            }
            Some(entry) => {
                entry.state = PeerState::Connected;
                entry.last_seen = now;
                tracing::info!(peer_id = %id, "peer reconnected");
                true
            }
            None => {
                tracing::info!(peer_id = %id, "peer connected");
                self.peers.insert(
                    id.clone(),
                    PeerEntry {
                        id,
                        state: PeerState::Connected,
                        last_seen: now,
                    },
                );
                true
            }
        }
    }

    /// Marks `id` as disconnected and starts its grace period.
    ///
    /// # Errors
    /// Returns [`PeerError::NotFound`] if the peer was never seen.
    pub fn disconnect(&mut self, id: &PeerId, now: Instant) -> Result<(), PeerError> {
        let entry = self
            .peers
            .get_mut(id)
            .ok_or_else(|| PeerError::NotFound(id.clone()))?;

        if entry.is_connected() {
            entry.state = PeerState::Disconnected { since: now };
            tracing::info!(peer_id = %id, "peer disconnected, grace period started");
        }
        Ok(())
    }

    /// Refreshes `last_seen` for a known peer. Unknown peers are ignored.
    pub fn touch(&mut self, id: &PeerId, now: Instant) {
        if let Some(entry) = self.peers.get_mut(id) {
            entry.last_seen = now;
        }
    }

    /// Expires every peer whose grace period has elapsed and returns
    /// their ids. Expired entries stay until [`cleanup_expired`].
    ///
    /// [`cleanup_expired`]: PeerDirectory::cleanup_expired
    pub fn expire_stale(&mut self, now: Instant) -> Vec<PeerId> {
        let grace = self.config.disconnect_grace;
        let mut expired = Vec::new();

        for entry in self.peers.values_mut() {
            if let PeerState::Disconnected { since } = entry.state {
                if now.saturating_duration_since(since) >= grace {
                    entry.state = PeerState::Expired;
                    expired.push(entry.id.clone());
                    tracing::info!(peer_id = %entry.id, "peer expired (grace period elapsed)");
                }
            }
        }

        expired
    }

    /// Removes expired entries.
    pub fn cleanup_expired(&mut self) {
        self.peers
            .retain(|_, entry| !matches!(entry.state, PeerState::Expired));
    }

    /// Forgets a peer entirely (explicit leave).
    pub fn remove(&mut self, id: &PeerId) -> Option<PeerEntry> {
        self.peers.remove(id)
    }

    /// Ids of every currently connected peer, sorted for stable output.
    pub fn connected(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self
            .peers
            .values()
            .filter(|e| e.is_connected())
            .map(|e| e.id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn is_connected(&self, id: &PeerId) -> bool {
        self.peers.get(id).is_some_and(PeerEntry::is_connected)
    }

    pub fn get(&self, id: &PeerId) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new(DirectoryConfig::default())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> PeerId {
        PeerId::new(s)
    }

    fn directory_with_grace(secs: u64) -> PeerDirectory {
        PeerDirectory::new(DirectoryConfig {
            disconnect_grace: Duration::from_secs(secs),
        })
    }

    #[test]
    fn test_connect_new_peer_reports_change() {
        let mut dir = PeerDirectory::default();
        let now = Instant::now();

        assert!(dir.connect(pid("a"), now));
        assert!(!dir.connect(pid("a"), now), "second connect is not a change");
        assert!(dir.is_connected(&pid("a")));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_disconnect_unknown_peer_returns_not_found() {
        let mut dir = PeerDirectory::default();
        let result = dir.disconnect(&pid("ghost"), Instant::now());
        assert!(matches!(result, Err(PeerError::NotFound(p)) if p == pid("ghost")));
    }

    #[test]
    fn test_disconnect_then_reconnect_within_grace() {
        let mut dir = directory_with_grace(30);
        let t0 = Instant::now();
        dir.connect(pid("a"), t0);
        dir.disconnect(&pid("a"), t0).unwrap();

        assert!(!dir.is_connected(&pid("a")));
        assert!(dir.expire_stale(t0 + Duration::from_secs(29)).is_empty());

        assert!(dir.connect(pid("a"), t0 + Duration::from_secs(29)));
        assert!(dir.is_connected(&pid("a")));
    }

    #[test]
    fn test_expire_stale_after_grace() {
        let mut dir = directory_with_grace(30);
        let t0 = Instant::now();
        dir.connect(pid("a"), t0);
        dir.connect(pid("b"), t0);
        dir.disconnect(&pid("a"), t0).unwrap();

        let expired = dir.expire_stale(t0 + Duration::from_secs(30));

        assert_eq!(expired, vec![pid("a")]);
        assert_eq!(dir.get(&pid("a")).unwrap().state, PeerState::Expired);
        // Expiring twice reports nothing new.
        assert!(dir.expire_stale(t0 + Duration::from_secs(31)).is_empty());

        dir.cleanup_expired();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.connected(), vec![pid("b")]);
    }

    #[test]
    fn test_disconnect_twice_keeps_original_since() {
        let mut dir = directory_with_grace(10);
        let t0 = Instant::now();
        dir.connect(pid("a"), t0);
        dir.disconnect(&pid("a"), t0).unwrap();
        dir.disconnect(&pid("a"), t0 + Duration::from_secs(5)).unwrap();

        assert_eq!(dir.expire_stale(t0 + Duration::from_secs(10)), vec![pid("a")]);
    }

    #[test]
    fn test_connected_is_sorted() {
        let mut dir = PeerDirectory::default();
        let now = Instant::now();
        for id in ["c", "a", "b"] {
            dir.connect(pid(id), now);
        }
        assert_eq!(dir.connected(), vec![pid("a"), pid("b"), pid("c")]);
    }

    #[test]
    fn test_touch_updates_last_seen_only_for_known() {
        let mut dir = PeerDirectory::default();
        let t0 = Instant::now();
        dir.connect(pid("a"), t0);
        let later = t0 + Duration::from_secs(3);

        dir.touch(&pid("a"), later);
        dir.touch(&pid("unknown"), later);

        assert_eq!(dir.get(&pid("a")).unwrap().last_seen, later);
        assert_eq!(dir.len(), 1);
    }
}
