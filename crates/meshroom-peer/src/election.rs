//! Host election.
//!
//! There is no server, so some peer has to be authoritative for the
//! room: it draws numbers, drives the countdown, and broadcasts
//! snapshots. Every node computes the same answer independently:
//!
//! > the host is the peer whose [`CanonicalId`] sorts first.
//!
//! No votes, no rounds. Two nodes that can see the same set of peers
//! agree on the host without exchanging a single message. Disagreement
//! only happens while membership views differ (two rooms merging, a
//! peer that just joined), and resolves as soon as the smaller id is
//! heard from: [`ElectionCoordinator::observe_assertion`] adopts any
//! asserted host that orders before the current belief and ignores the
//! rest.
//!
//! # Stale hosts
//!
//! A host that stops sending heartbeats is suspected after
//! `liveness_timeout` and excluded from the next election. Re-elections
//! triggered this way are rate-limited by `reelection_cooldown`, so a
//! flapping host causes at most one re-election per cooldown window
//! instead of a storm.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use meshroom_protocol::{CanonicalId, PeerId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::PeerError;

// ---------------------------------------------------------------------------
// Pure election
// ---------------------------------------------------------------------------

/// Picks the host among `candidates`.
///
/// Deterministic and independent of input order: candidates are
/// compared by canonical form (ties between differently-decorated raw
/// ids broken by the raw string). Returns `self_id` when `candidates`
/// is empty. `self_id` is *not* implicitly a candidate; use
/// [`is_self_host`] for that.
pub fn elect_host(candidates: &[PeerId], self_id: &PeerId) -> PeerId {
    candidates
        .iter()
        .min_by(|a, b| {
            a.canonical()
                .cmp(&b.canonical())
                .then_with(|| a.as_str().cmp(b.as_str()))
        })
        .cloned()
        .unwrap_or_else(|| self_id.clone())
}

/// Returns `true` if `self_id` wins an election over `candidates ∪ {self}`.
pub fn is_self_host(candidates: &[PeerId], self_id: &PeerId) -> bool {
    let mut all = candidates.to_vec();
    all.push(self_id.clone());
    elect_host(&all, self_id).same_peer(self_id)
}

// ---------------------------------------------------------------------------
// ElectionConfig
// ---------------------------------------------------------------------------

/// Timing for liveness-driven re-election.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// How long the believed host may stay silent before it's suspected.
    ///
    /// Default: 10 seconds.
    pub liveness_timeout: Duration,

    /// Minimum spacing between liveness-triggered re-elections.
    ///
    /// Default: 15 seconds.
    pub reelection_cooldown: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(10),
            reelection_cooldown: Duration::from_secs(15),
        }
    }
}

impl ElectionConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        if self.liveness_timeout < Duration::from_secs(1) {
            tracing::warn!(timeout = ?self.liveness_timeout, "liveness timeout below 1s, clamping");
            self.liveness_timeout = Duration::from_secs(1);
        }
        if self.reelection_cooldown < self.liveness_timeout {
            tracing::warn!(
                cooldown = ?self.reelection_cooldown,
                "re-election cooldown shorter than liveness timeout, raising it"
            );
            self.reelection_cooldown = self.liveness_timeout;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Role / ElectionRecord / ElectionOutcome
// ---------------------------------------------------------------------------

/// This node's view of its own authority.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Role {
    /// No election has run yet.
    #[default]
    Undecided,
    /// This node is authoritative for the room.
    Host,
    /// Another peer is authoritative.
    Follower { host: PeerId },
}

impl Role {
    pub fn is_host(&self) -> bool {
        matches!(self, Role::Host)
    }
}

/// Election bookkeeping. Only the coordinator mutates it.
#[derive(Debug, Clone, Default)]
pub struct ElectionRecord {
    /// The peer currently believed to be host.
    pub candidate_host: Option<PeerId>,
    /// Last time each peer was heard from while acting as host.
    pub last_heartbeat_by_host: HashMap<PeerId, Instant>,
    /// Set by a liveness re-election, cleared once the new host is heard
    /// from (or this node takes over).
    pub election_in_flight: bool,
    /// When the last liveness-triggered re-election ran.
    pub last_election_at: Option<Instant>,
}

/// What an election step changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElectionOutcome {
    Unchanged,
    Changed {
        previous: Role,
        current: Role,
        /// The newly believed host (this node's id if it became host).
        host: PeerId,
    },
}

impl ElectionOutcome {
    pub fn is_changed(&self) -> bool {
        matches!(self, ElectionOutcome::Changed { .. })
    }

    /// This node just became host.
    pub fn promoted(&self) -> bool {
        matches!(
            self,
            ElectionOutcome::Changed { previous, current: Role::Host, .. } if !previous.is_host()
        )
    }

    /// This node was host and no longer is.
    pub fn demoted(&self) -> bool {
        matches!(
            self,
            ElectionOutcome::Changed { previous: Role::Host, current, .. } if !current.is_host()
        )
    }
}

// ---------------------------------------------------------------------------
// ElectionCoordinator
// ---------------------------------------------------------------------------

/// Owns this node's [`Role`] and drives it through elections.
///
/// ```text
///               evaluate / observe_assertion / check_liveness
///  Undecided ───────────────────────────────────────────────→ Host
///      │                                                     ↑  │
///      └──────────────────────────────→ Follower { host } ───┘  │
///                                              ↑                │
///                                              └────────────────┘
/// ```
pub struct ElectionCoordinator {
    self_id: PeerId,
    role: Role,
    record: ElectionRecord,
    /// Hosts excluded from elections until they're heard from again.
    suspected: HashSet<CanonicalId>,
    reelections: u32,
    config: ElectionConfig,
}

impl ElectionCoordinator {
    pub fn new(self_id: PeerId, config: ElectionConfig) -> Self {
        Self {
            self_id,
            role: Role::Undecided,
            record: ElectionRecord::default(),
            suspected: HashSet::new(),
            reelections: 0,
            config: config.validated(),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }

    /// The believed host, if an election has run.
    pub fn host(&self) -> Option<&PeerId> {
        match &self.role {
            Role::Undecided => None,
            Role::Host => Some(&self.self_id),
            Role::Follower { host } => Some(host),
        }
    }

    pub fn record(&self) -> &ElectionRecord {
        &self.record
    }

    /// Number of liveness-triggered re-elections so far.
    pub fn reelections(&self) -> u32 {
        self.reelections
    }

    /// Runs the election over `candidates` (plus this node) and adopts
    /// the result. Suspected hosts are left out.
    ///
    /// Pure with respect to its inputs, so it is safe to call on every
    /// membership change.
    pub fn evaluate(&mut self, candidates: &[PeerId], now: Instant) -> ElectionOutcome {
        let mut pool: Vec<PeerId> = candidates
            .iter()
            .filter(|c| !self.suspected.contains(&c.canonical()))
            .cloned()
            .collect();
        pool.push(self.self_id.clone());
        let elected = elect_host(&pool, &self.self_id);
        self.adopt(elected, now)
    }

    /// Handles a message asserting `asserted` as host.
    ///
    /// Adopts it if it orders before the current belief (this node
    /// counts as its own belief while undecided).
    ///
    /// # Errors
    /// Returns [`PeerError::ElectionConflict`] when the assertion orders
    /// after the current belief; the caller should drop the message.
    pub fn observe_assertion(
        &mut self,
        asserted: &PeerId,
        now: Instant,
    ) -> Result<ElectionOutcome, PeerError> {
        let believed = self.host().unwrap_or(&self.self_id).clone();

        if asserted.same_peer(&believed) {
            self.record_heartbeat(asserted, now);
            return Ok(ElectionOutcome::Unchanged);
        }

        if asserted.canonical() < believed.canonical() {
            tracing::info!(%asserted, %believed, "adopting smaller asserted host");
            self.record_heartbeat(asserted, now);
            return Ok(self.adopt(asserted.clone(), now));
        }

        Err(PeerError::ElectionConflict {
            believed,
            asserted: asserted.clone(),
        })
    }

    /// Follows `host` unconditionally, without running an election.
    ///
    /// Used while a node is still catching up with a room it just
    /// joined: the room's current host keeps authority until this node
    /// has its state, even if this node's id orders first.
    pub fn follow(&mut self, host: &PeerId, now: Instant) -> ElectionOutcome {
        self.record_heartbeat(host, now);
        self.adopt(host.clone(), now)
    }

    /// Refreshes liveness for a peer acting as host.
    pub fn record_heartbeat(&mut self, from: &PeerId, now: Instant) {
        self.record.last_heartbeat_by_host.insert(from.clone(), now);
        self.suspected.remove(&from.canonical());
        if self
            .record
            .candidate_host
            .as_ref()
            .is_some_and(|h| h.same_peer(from))
        {
            self.record.election_in_flight = false;
        }
    }

    /// Re-elects if the believed host has been silent too long.
    ///
    /// Only followers with at least one connected peer check. The silent
    /// host is excluded from the new election until it is heard from
    /// again. At most one re-election runs per `reelection_cooldown`.
    pub fn check_liveness(&mut self, connected: &[PeerId], now: Instant) -> ElectionOutcome {
        let Role::Follower { host } = &self.role else {
            return ElectionOutcome::Unchanged;
        };
        if connected.is_empty() {
            return ElectionOutcome::Unchanged;
        }

        let last = self
            .record
            .last_heartbeat_by_host
            .get(host)
            .copied()
            .unwrap_or(now);
        let silent_for = now.saturating_duration_since(last);
        if silent_for <= self.config.liveness_timeout {
            return ElectionOutcome::Unchanged;
        }

        if let Some(at) = self.record.last_election_at {
            if now.saturating_duration_since(at) < self.config.reelection_cooldown {
                tracing::trace!(%host, "host silent but re-election cooling down");
                return ElectionOutcome::Unchanged;
            }
        }

        tracing::warn!(%host, ?silent_for, "host silent, re-electing");
        self.suspected.insert(host.canonical());
        self.record.last_election_at = Some(now);
        self.record.election_in_flight = true;
        self.reelections += 1;
        self.evaluate(connected, now)
    }

    /// Forgets everything (leaving the room).
    pub fn reset(&mut self) {
        self.role = Role::Undecided;
        self.record = ElectionRecord::default();
        self.suspected.clear();
    }

    fn adopt(&mut self, host: PeerId, now: Instant) -> ElectionOutcome {
        if self.host().is_some_and(|h| h.same_peer(&host)) {
            return ElectionOutcome::Unchanged;
        }

        let current = if host.same_peer(&self.self_id) {
            Role::Host
        } else {
            Role::Follower { host: host.clone() }
        };
        let previous = std::mem::replace(&mut self.role, current.clone());

        // A freshly adopted host gets a full liveness window.
        self.record.last_heartbeat_by_host.insert(host.clone(), now);
        self.record.candidate_host = Some(host.clone());
        if current.is_host() {
            self.record.election_in_flight = false;
        }

        tracing::info!(self_id = %self.self_id, %host, role = ?current, "host changed");
        ElectionOutcome::Changed {
            previous,
            current,
            host,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
