//! The room state reconciler.
//!
//! Every node keeps its own mirror of the room. Two kinds of update feed
//! it:
//!
//! - **Snapshots** from the host are authoritative for membership and
//!   phase. They replace the player list, except that a node never lets
//!   a snapshot remove itself (the host may simply not have heard our
//!   join yet). Within a round drawn numbers are append-only: a snapshot
//!   can add numbers but never take one away. [`RoomState::same_round`]
//!   tells the caller when a snapshot belongs to a different round.
//! - **Incrementals** (joins, heartbeats, progress reports) are merged.
//!   Merges are commutative and idempotent, so the order and number of
//!   deliveries doesn't matter.
//!
//! Nothing here does I/O or looks at the clock; the room actor decides
//! what to apply and when.

use meshroom_protocol::{Phase, PeerId, PlayerRecord, RoomSnapshot};

/// What an incremental merge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Added,
    Updated,
    Unchanged,
}

/// What applying a snapshot changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotChanges {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
    /// `Some((from, to))` if the phase changed.
    pub phase: Option<(Phase, Phase)>,
    /// Numbers this node hadn't seen before, in draw order.
    pub new_numbers: Vec<u16>,
}

impl SnapshotChanges {
    pub fn membership_changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// A node's mirror of the shared room.
///
/// Invariants: players are unique by id, drawn numbers contain no
/// duplicates and only ever grow within a round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomState {
    pub room_id: String,
    pub host_id: Option<PeerId>,
    players: Vec<PlayerRecord>,
    pub phase: Phase,
    drawn: Vec<u16>,
    pub current: Option<u16>,
    pub countdown: u8,
    /// Whose turn it is and their position in the rotation.
    pub turn: Option<(PeerId, u8)>,
}

impl RoomState {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Self::default()
        }
    }

    // -- Accessors --------------------------------------------------------

    pub fn players(&self) -> &[PlayerRecord] {
        &self.players
    }

    pub fn player(&self, id: &PeerId) -> Option<&PlayerRecord> {
        self.players.iter().find(|p| &p.id == id)
    }

    fn player_mut(&mut self, id: &PeerId) -> Option<&mut PlayerRecord> {
        self.players.iter_mut().find(|p| &p.id == id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.player(id).is_some()
    }

    pub fn drawn(&self) -> &[u16] {
        &self.drawn
    }

    /// Players ordered by canonical id. This is the turn rotation order
    /// and the tie-break order for winners, identical on every node.
    pub fn rotation(&self) -> Vec<&PlayerRecord> {
        let mut ordered: Vec<&PlayerRecord> = self.players.iter().collect();
        ordered.sort_by_cached_key(|p| p.id.canonical());
        ordered
    }

    /// The first player (in rotation order) who has won or reached
    /// `win_lines`.
    pub fn winner(&self, win_lines: u8) -> Option<&PlayerRecord> {
        self.rotation()
            .into_iter()
            .find(|p| p.has_won || p.completed_lines >= win_lines)
    }

    /// Builds the snapshot a host broadcasts.
    pub fn to_snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            host_id: self.host_id.clone(),
            players: self.players.clone(),
            phase: self.phase,
            drawn: self.drawn.clone(),
            current: self.current,
            countdown: self.countdown,
        }
    }

    // -- Authoritative replacement ----------------------------------------

    /// Replaces the mirror with the host's snapshot.
    ///
    /// `local` is this node's own record. If the snapshot omits it, it
    /// is put back; if the snapshot has it, the local progress wins
    /// wherever it is further along. Numbers this node drew or heard
    /// that the snapshot lacks are kept; call [`reset_for_new_round`]
    /// first when [`same_round`] says the snapshot starts over.
    ///
    /// [`reset_for_new_round`]: Self::reset_for_new_round
    /// [`same_round`]: Self::same_round
    pub fn apply_snapshot(&mut self, remote: &RoomSnapshot, local: &PlayerRecord) -> SnapshotChanges {
        let mut changes = SnapshotChanges::default();

        let mut players: Vec<PlayerRecord> = Vec::with_capacity(remote.players.len() + 1);
        for record in &remote.players {
            match players.iter_mut().find(|p| p.id == record.id) {
                Some(existing) => merge_into(existing, record),
                None => players.push(record.clone()),
            }
        }
        match players.iter_mut().find(|p| p.id == local.id) {
            Some(me) => {
                me.completed_lines = me.completed_lines.max(local.completed_lines);
                me.has_won |= local.has_won;
                me.connected = true;
            }
            None => players.push(local.clone()),
        }

        for p in &players {
            if !self.contains(&p.id) {
                changes.added.push(p.id.clone());
            }
        }
        for p in &self.players {
            if !players.iter().any(|q| q.id == p.id) {
                changes.removed.push(p.id.clone());
            }
        }
        self.players = players;

        changes.new_numbers = self.union_drawn(&remote.drawn);
        self.current = remote.current.or(self.current);
        self.countdown = remote.countdown;

        if self.phase != remote.phase {
            changes.phase = Some((self.phase, remote.phase));
            self.phase = remote.phase;
        }

        changes
    }

    /// `false` if `remote` describes a different round than this mirror:
    /// the host is back in the lobby, behind our phase, or drawing from a
    /// sequence that doesn't start like ours.
    pub fn same_round(&self, remote: &RoomSnapshot) -> bool {
        if self.phase == Phase::Waiting {
            return true;
        }
        if remote.phase.as_u8() < self.phase.as_u8() {
            return false;
        }
        match (self.drawn.first(), remote.drawn.is_empty()) {
            (Some(first), false) => remote.drawn.contains(first),
            _ => true,
        }
    }

    /// Folds a rival host's snapshot into this (host's) mirror.
    ///
    /// Players are unioned, drawn numbers are unioned (ours first), and
    /// the phase moves to whichever side is further into the round. The
    /// rival's countdown and current number come along when it is ahead.
    pub fn inherit(&mut self, rival: &RoomSnapshot) -> SnapshotChanges {
        let mut changes = SnapshotChanges::default();
        for record in &rival.players {
            if self.merge_incremental(record) == MergeOutcome::Added {
                changes.added.push(record.id.clone());
            }
        }
        changes.new_numbers = self.union_drawn(&rival.drawn);

        if rival.phase.as_u8() > self.phase.as_u8() {
            changes.phase = Some((self.phase, rival.phase));
            self.phase = rival.phase;
            self.countdown = rival.countdown;
            self.current = rival.current.or(self.current);
        } else if self.current.is_none() {
            self.current = rival.current;
        }
        changes
    }

    /// Appends the numbers in `incoming` we haven't seen, in their order,
    /// and returns them.
    fn union_drawn(&mut self, incoming: &[u16]) -> Vec<u16> {
        let mut added = Vec::new();
        for &n in incoming {
            if !self.drawn.contains(&n) {
                self.drawn.push(n);
                added.push(n);
            }
        }
        added
    }

    // -- Incremental merges -----------------------------------------------

    /// Merges one player record into the mirror.
    ///
    /// Union by id. On conflict: the existing non-empty name is kept,
    /// `completed_lines` takes the max, `has_won` and `connected` are
    /// OR-ed.
    pub fn merge_incremental(&mut self, record: &PlayerRecord) -> MergeOutcome {
        match self.player_mut(&record.id) {
            Some(existing) => {
                let before = existing.clone();
                merge_into(existing, record);
                if *existing == before {
                    MergeOutcome::Unchanged
                } else {
                    MergeOutcome::Updated
                }
            }
            None => {
                self.players.push(record.clone());
                MergeOutcome::Added
            }
        }
    }

    /// Updates progress for a known player. Unknown ids are ignored.
    pub fn merge_progress(&mut self, id: &PeerId, completed_lines: u8, has_won: bool) -> MergeOutcome {
        match self.player(id) {
            Some(existing) => {
                let record = PlayerRecord {
                    completed_lines,
                    has_won,
                    ..existing.clone()
                };
                self.merge_incremental(&record)
            }
            None => MergeOutcome::Unchanged,
        }
    }

    /// Marks a known player connected. Never adds a player.
    pub fn refresh_heartbeat(&mut self, id: &PeerId) -> bool {
        match self.player_mut(id) {
            Some(p) => {
                p.connected = true;
                true
            }
            None => false,
        }
    }

    /// Records a drawn number. Returns `false` (and changes nothing) if
    /// it was already drawn.
    pub fn apply_number_drawn(&mut self, number: u16) -> bool {
        if self.drawn.contains(&number) {
            return false;
        }
        self.drawn.push(number);
        self.current = Some(number);
        true
    }

    pub fn remove_player(&mut self, id: &PeerId) -> Option<PlayerRecord> {
        let idx = self.players.iter().position(|p| &p.id == id)?;
        Some(self.players.remove(idx))
    }

    /// Returns `true` if the player was known and connected.
    pub fn mark_disconnected(&mut self, id: &PeerId) -> bool {
        match self.player_mut(id) {
            Some(p) if p.connected => {
                p.connected = false;
                true
            }
            _ => false,
        }
    }

    pub fn apply_turn(&mut self, next: PeerId, turn_index: u8) {
        self.turn = Some((next, turn_index));
    }

    /// Sets the phase, returning the previous one if it changed.
    pub fn set_phase(&mut self, phase: Phase) -> Option<Phase> {
        if self.phase == phase {
            return None;
        }
        Some(std::mem::replace(&mut self.phase, phase))
    }

    /// Back to the lobby: keeps the players, clears everything the round
    /// produced.
    pub fn reset_for_new_round(&mut self) {
        self.phase = Phase::Waiting;
        self.drawn.clear();
        self.current = None;
        self.countdown = 0;
        self.turn = None;
        for p in &mut self.players {
            p.completed_lines = 0;
            p.has_won = false;
        }
    }

    /// Forgets the room entirely (leaving it).
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn merge_into(existing: &mut PlayerRecord, incoming: &PlayerRecord) {
    if existing.name.is_empty() {
        existing.name.clone_from(&incoming.name);
    }
    existing.completed_lines = existing.completed_lines.max(incoming.completed_lines);
    existing.has_won |= incoming.has_won;
    existing.connected |= incoming.connected;
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

    fn rec(id: &str, lines: u8) -> PlayerRecord {
        PlayerRecord {
            completed_lines: lines,
            ..PlayerRecord::new(pid(id), id.to_uppercase())
        }
    }

    fn state_with(ids: &[&str]) -> RoomState {
        let mut s = RoomState::new("room");
        for id in ids {
            s.merge_incremental(&rec(id, 0));
        }
        s
    }

    fn ids(s: &RoomState) -> Vec<String> {
        let mut v: Vec<String> = s.players().iter().map(|p| p.id.to_string()).collect();
        v.sort();
        v
    }

    // =====================================================================
    // apply_snapshot()
    // =====================================================================

    #[test]
    fn test_apply_snapshot_replaces_players_and_keeps_self() {
        // Follower p3 knows {p1, p3}; the host's snapshot says {p1, p2}.
        let mut s = state_with(&["p1", "p3"]);
        let snap = RoomSnapshot {
            room_id: "room".into(),
            host_id: Some(pid("p1")),
            players: vec![rec("p1", 0), rec("p2", 0)],
            ..RoomSnapshot::default()
        };

        let changes = s.apply_snapshot(&snap, &rec("p3", 0));

        assert_eq!(ids(&s), vec!["p1", "p2", "p3"]);
        assert_eq!(changes.added, vec![pid("p2")]);
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_apply_snapshot_removes_players_the_host_dropped() {
        let mut s = state_with(&["p1", "p2", "p3"]);
        let snap = RoomSnapshot {
            players: vec![rec("p1", 0)],
            ..RoomSnapshot::default()
        };

        let changes = s.apply_snapshot(&snap, &rec("p3", 0));

        assert_eq!(ids(&s), vec!["p1", "p3"]);
        assert_eq!(changes.removed, vec![pid("p2")]);
        assert!(changes.membership_changed());
    }

    #[test]
    fn test_apply_snapshot_local_progress_never_regresses() {
        let mut s = state_with(&["p1"]);
        let snap = RoomSnapshot {
            players: vec![rec("p1", 0), rec("me", 1)],
            ..RoomSnapshot::default()
        };

        s.apply_snapshot(&snap, &rec("me", 3));

        assert_eq!(s.player(&pid("me")).unwrap().completed_lines, 3);
    }

    #[test]
    fn test_apply_snapshot_phase_and_numbers() {
        let mut s = state_with(&["p1"]);
        s.apply_number_drawn(7);
        let snap = RoomSnapshot {
            phase: Phase::Playing,
            drawn: vec![7, 12, 12, 30],
            current: Some(30),
            ..RoomSnapshot::default()
        };

        let changes = s.apply_snapshot(&snap, &rec("p1", 0));

        assert_eq!(changes.phase, Some((Phase::Waiting, Phase::Playing)));
        assert_eq!(changes.new_numbers, vec![12, 30]);
        assert_eq!(s.drawn(), &[7, 12, 30], "duplicates in a snapshot collapse");
        assert_eq!(s.current, Some(30));
    }

    #[test]
    fn test_duplicate_number_around_snapshot_appears_once() {
        let mut s = state_with(&["p1"]);
        assert!(s.apply_number_drawn(42));
        let snap = RoomSnapshot {
            drawn: vec![42],
            current: Some(42),
            phase: Phase::Playing,
            ..RoomSnapshot::default()
        };
        s.apply_snapshot(&snap, &rec("p1", 0));
        assert!(!s.apply_number_drawn(42));

        assert_eq!(s.drawn(), &[42]);
    }

    #[test]
    fn test_apply_snapshot_never_drops_drawn_numbers() {
        // We heard 40 before the host's snapshot caught up with it.
        let mut s = state_with(&["p1"]);
        s.set_phase(Phase::Playing);
        for n in [3, 8, 40] {
            s.apply_number_drawn(n);
        }
        let snap = RoomSnapshot {
            phase: Phase::Playing,
            drawn: vec![3, 8, 11],
            current: Some(11),
            ..RoomSnapshot::default()
        };

        assert!(s.same_round(&snap));
        let changes = s.apply_snapshot(&snap, &rec("p1", 0));

        assert_eq!(s.drawn(), &[3, 8, 40, 11]);
        assert_eq!(changes.new_numbers, vec![11]);
    }

    #[test]
    fn test_same_round_detects_a_new_round() {
        let mut s = state_with(&["p1"]);
        let lobby = RoomSnapshot::default();
        let playing = |drawn: Vec<u16>| RoomSnapshot {
            phase: Phase::Playing,
            drawn,
            ..RoomSnapshot::default()
        };

        // Anything goes from the lobby.
        assert!(s.same_round(&playing(vec![1])));

        s.set_phase(Phase::Playing);
        s.apply_number_drawn(5);
        assert!(!s.same_round(&lobby), "host went back to the lobby");
        assert!(s.same_round(&playing(vec![5, 6])));
        assert!(!s.same_round(&playing(vec![9])), "different opening number");
        assert!(s.same_round(&playing(vec![])));

        let countdown = RoomSnapshot {
            phase: Phase::Countdown,
            ..RoomSnapshot::default()
        };
        assert!(!s.same_round(&countdown), "phase behind ours");
    }

    // =====================================================================
    // inherit()
    // =====================================================================

    #[test]
    fn test_inherit_takes_the_furthest_round() {
        // A fresh host meets a rival that has been playing for a while.
        let mut host = state_with(&["a"]);
        let rival = RoomSnapshot {
            host_id: Some(pid("b")),
            players: vec![rec("b", 1), rec("c", 0)],
            phase: Phase::Playing,
            drawn: vec![10, 20, 30],
            current: Some(30),
            ..RoomSnapshot::default()
        };

        let changes = host.inherit(&rival);

        assert_eq!(ids(&host), vec!["a", "b", "c"]);
        assert_eq!(changes.added, vec![pid("b"), pid("c")]);
        assert_eq!(host.phase, Phase::Playing);
        assert_eq!(changes.phase, Some((Phase::Waiting, Phase::Playing)));
        assert_eq!(host.drawn(), &[10, 20, 30]);
        assert_eq!(host.current, Some(30));
        assert_eq!(host.player(&pid("b")).unwrap().completed_lines, 1);
    }

    #[test]
    fn test_inherit_unions_numbers_and_keeps_our_lead() {
        let mut host = state_with(&["a", "b"]);
        host.set_phase(Phase::Finished);
        for n in [1, 2, 3] {
            host.apply_number_drawn(n);
        }
        let rival = RoomSnapshot {
            players: vec![rec("b", 0)],
            phase: Phase::Playing,
            drawn: vec![2, 4],
            ..RoomSnapshot::default()
        };

        let changes = host.inherit(&rival);

        assert_eq!(host.phase, Phase::Finished, "never moves backwards");
        assert!(changes.phase.is_none());
        assert_eq!(host.drawn(), &[1, 2, 3, 4]);
        assert_eq!(changes.new_numbers, vec![4]);
        assert!(!changes.membership_changed());
    }

    // =====================================================================
    // merge_incremental()
    // =====================================================================

    #[test]
    fn test_merge_incremental_is_commutative() {
        let a = PlayerRecord { has_won: false, ..rec("x", 4) };
        let b = PlayerRecord { has_won: true, connected: false, ..rec("x", 2) };
        let c = rec("y", 1);

        let mut s1 = RoomState::new("room");
        for r in [&a, &b, &c] {
            s1.merge_incremental(r);
        }
        let mut s2 = RoomState::new("room");
        for r in [&c, &b, &a] {
            s2.merge_incremental(r);
        }

        for id in ["x", "y"] {
            assert_eq!(s1.player(&pid(id)), s2.player(&pid(id)));
        }
        let x = s1.player(&pid("x")).unwrap();
        assert_eq!(x.completed_lines, 4);
        assert!(x.has_won);
        assert!(x.connected);
    }

    #[test]
    fn test_merge_incremental_is_idempotent() {
        let mut s = RoomState::new("room");
        assert_eq!(s.merge_incremental(&rec("x", 2)), MergeOutcome::Added);
        let once = s.clone();
        assert_eq!(s.merge_incremental(&rec("x", 2)), MergeOutcome::Unchanged);
        assert_eq!(s, once);
    }

    #[test]
    fn test_merge_incremental_keeps_existing_name() {
        let mut s = RoomState::new("room");
        s.merge_incremental(&PlayerRecord::new(pid("x"), "Alice"));
        s.merge_incremental(&PlayerRecord::new(pid("x"), "Mallory"));
        assert_eq!(s.player(&pid("x")).unwrap().name, "Alice");
    }

    #[test]
    fn test_merge_progress_ignores_unknown_players() {
        let mut s = state_with(&["a"]);
        assert_eq!(s.merge_progress(&pid("ghost"), 3, false), MergeOutcome::Unchanged);
        assert!(!s.contains(&pid("ghost")));
        assert_eq!(s.merge_progress(&pid("a"), 3, false), MergeOutcome::Updated);
    }

    // =====================================================================
    // heartbeat / numbers / removal
    // =====================================================================

    #[test]
    fn test_refresh_heartbeat_never_adds() {
        let mut s = state_with(&["a"]);
        s.mark_disconnected(&pid("a"));

        assert!(s.refresh_heartbeat(&pid("a")));
        assert!(!s.refresh_heartbeat(&pid("stranger")));

        assert!(s.player(&pid("a")).unwrap().connected);
        assert_eq!(s.players().len(), 1);
    }

    #[test]
    fn test_apply_number_drawn_dedups_under_reordering() {
        let mut s = RoomState::new("room");
        for n in [5, 9, 5, 3, 9, 9] {
            s.apply_number_drawn(n);
        }
        assert_eq!(s.drawn(), &[5, 9, 3]);
        assert_eq!(s.current, Some(3));
    }

    #[test]
    fn test_remove_and_mark_disconnected() {
        let mut s = state_with(&["a", "b"]);
        assert!(s.mark_disconnected(&pid("a")));
        assert!(!s.mark_disconnected(&pid("a")));
        assert!(s.remove_player(&pid("b")).is_some());
        assert!(s.remove_player(&pid("b")).is_none());
        assert_eq!(ids(&s), vec!["a"]);
    }

    // =====================================================================
    // rounds
    // =====================================================================

    #[test]
    fn test_winner_uses_rotation_order() {
        let mut s = RoomState::new("room");
        s.merge_incremental(&rec("zed", 5));
        s.merge_incremental(&rec("amy", 5));
        s.merge_incremental(&rec("bob", 2));

        assert_eq!(s.winner(5).unwrap().id, pid("amy"));
        assert!(s.winner(6).is_none());
    }

    #[test]
    fn test_reset_for_new_round_keeps_players() {
        let mut s = state_with(&["a", "b"]);
        s.merge_progress(&pid("a"), 5, true);
        s.set_phase(Phase::Finished);
        s.apply_number_drawn(1);
        s.apply_turn(pid("a"), 0);

        s.reset_for_new_round();

        assert_eq!(s.phase, Phase::Waiting);
        assert!(s.drawn().is_empty());
        assert!(s.turn.is_none());
        assert_eq!(s.players().len(), 2);
        assert!(s.players().iter().all(|p| p.completed_lines == 0 && !p.has_won));
    }

    #[test]
    fn test_set_phase_reports_previous() {
        let mut s = RoomState::new("room");
        assert_eq!(s.set_phase(Phase::Countdown), Some(Phase::Waiting));
        assert_eq!(s.set_phase(Phase::Countdown), None);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut s = state_with(&["a"]);
        s.host_id = Some(pid("a"));
        s.clear();
        assert_eq!(s, RoomState::default());
    }

    #[test]
    fn test_to_snapshot_round_trips_through_apply() {
        let mut host = state_with(&["a", "b"]);
        host.host_id = Some(pid("a"));
        host.set_phase(Phase::Playing);
        host.apply_number_drawn(17);

        let mut follower = state_with(&["b"]);
        follower.apply_snapshot(&host.to_snapshot(), &rec("b", 0));

        assert_eq!(ids(&follower), vec!["a", "b"]);
        assert_eq!(follower.drawn(), &[17]);
        assert_eq!(follower.phase, Phase::Playing);
    }

    // =====================================================================
    // Properties
    // =====================================================================

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn record() -> impl Strategy<Value = PlayerRecord> {
            ("[a-e]", "[A-Z]{0,3}", 0u8..6, any::<bool>(), any::<bool>()).prop_map(
                |(id, name, completed_lines, has_won, connected)| PlayerRecord {
                    id: PeerId::new(id),
                    name,
                    completed_lines,
                    has_won,
                    connected,
                },
            )
        }

        fn records_and_permutation() -> impl Strategy<Value = (Vec<PlayerRecord>, Vec<PlayerRecord>)> {
            prop::collection::vec(record(), 0..12)
                .prop_flat_map(|rs| (Just(rs.clone()), Just(rs).prop_shuffle()))
        }

        fn merged(records: &[PlayerRecord]) -> RoomState {
            let mut s = RoomState::new("room");
            for r in records {
                s.merge_incremental(r);
            }
            s
        }

        /// Everything but the first-seen name, which is order-dependent.
        fn progress(s: &RoomState) -> Vec<(String, u8, bool, bool)> {
            let mut v: Vec<_> = s
                .players()
                .iter()
                .map(|p| (p.id.to_string(), p.completed_lines, p.has_won, p.connected))
                .collect();
            v.sort();
            v
        }

        proptest! {
            /// Delivery order doesn't change the merged players.
            #[test]
            fn merge_incremental_commutes((records, shuffled) in records_and_permutation()) {
                prop_assert_eq!(progress(&merged(&records)), progress(&merged(&shuffled)));
            }

            /// Delivering every record twice changes nothing.
            #[test]
            fn merge_incremental_is_idempotent(records in prop::collection::vec(record(), 0..12)) {
                let once = merged(&records);
                let mut twice = once.clone();
                for r in &records {
                    twice.merge_incremental(r);
                }
                prop_assert_eq!(once, twice);
            }

            /// Drawn numbers stay unique and complete whatever mix of
            /// duplicated, reordered draws and snapshots arrives.
            #[test]
            fn drawn_numbers_never_duplicate(
                deliveries in prop::collection::vec(
                    prop_oneof![
                        (1u16..30).prop_map(|n| vec![n]),
                        prop::collection::vec(1u16..30, 0..6),
                    ],
                    0..20,
                ),
            ) {
                let mut s = RoomState::new("room");
                s.set_phase(Phase::Playing);
                let me = PlayerRecord::new(PeerId::new("me"), "Me");
                let mut seen = Vec::new();
                for numbers in &deliveries {
                    if let [n] = numbers.as_slice() {
                        s.apply_number_drawn(*n);
                    } else {
                        let snap = RoomSnapshot {
                            phase: Phase::Playing,
                            drawn: numbers.clone(),
                            ..RoomSnapshot::default()
                        };
                        s.apply_snapshot(&snap, &me);
                    }
                    seen.extend(numbers.iter().copied());
                }

                let mut sorted = s.drawn().to_vec();
                sorted.sort_unstable();
                sorted.dedup();
                prop_assert_eq!(sorted.len(), s.drawn().len());
                for n in seen {
                    prop_assert!(s.drawn().contains(&n));
                }
            }
        }
    }
}
