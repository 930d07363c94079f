//! Room actor: one Tokio task per node that owns everything about the
//! room this node is in.
//!
//! The actor owns the [`RoomState`] mirror, the election coordinator,
//! the peer directory, the deduplicator and the game rules. Nothing else
//! touches them. Inputs arrive over channels and are handled one at a
//! time inside a single `tokio::select!`:
//!
//! ```text
//!  RoomHandle ──commands──┐
//!  Transport ───events────┤
//!  Gate worker ─reports───┼──→ RoomActor ──outbox──→ Gate worker ──→ Transport
//!  Timers ──────ticks─────┘        │
//!                                  └──events──→ RoomEvent stream (UI)
//! ```
//!
//! State changes are synchronous. Outbound messages are queued for the
//! gate worker, so a send stuck in retry backoff never stalls the actor.
//!
//! # Joining an existing room
//!
//! A node that joins next to other peers first *syncs*: it stays silent
//! and out of elections until the room's snapshot arrives (or the sync
//! window runs out), follows whoever sent it, and only then runs its own
//! election. A smaller id taking over mid-round therefore carries the
//! round on instead of announcing an empty one. A host that still meets
//! a rival host folds the rival's round into its own before asserting
//! itself.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use meshroom_peer::{
    ElectionCoordinator, ElectionOutcome, MessageDeduplicator, PeerDirectory, Role,
};
use meshroom_protocol::{
    Codec, GameMessage, MessageBody, MessageKind, PeerId, Phase, PlayerRecord, RoomSnapshot,
};
use meshroom_tick::{Deadline, TickConfig, TickScheduler};
use meshroom_transport::{Transport, TransportEvent};
use rand::Rng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::gate::{Delivery, GateReport, Outbound, run_gate_worker};
use crate::state::{MergeOutcome, SnapshotChanges};
use crate::{BroadcastGate, GameRules, GateError, RoomConfig, RoomError, RoomState};

/// Longest room id or player name that fits a 1-byte length prefix.
const MAX_LABEL_LEN: usize = 255;

const COUNTDOWN_STEP: Duration = Duration::from_secs(1);

/// Sync windows a joining node waits out while it still hears the room.
const MAX_SYNC_WINDOWS: u32 = 3;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Something the UI may want to show. Delivered in the order the actor
/// processed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    Joined { room_id: String },
    Left,
    PlayerJoined(PlayerRecord),
    PlayerLeft(PeerId),
    PlayerDisconnected(PeerId),
    HostChanged { host: PeerId, is_self: bool },
    PhaseChanged(Phase),
    CountdownTick(u8),
    NumberDrawn(u16),
    TurnChanged { next: PeerId, turn_index: u8 },
    ProgressUpdated { id: PeerId, completed_lines: u8, has_won: bool },
    GameWon { winner: PeerId, name: String },
    Chat { from: PeerId, name: String, text: String },
    Emote { from: PeerId, name: String, emote: String },
    Raw { from: PeerId, data: Vec<u8> },
    /// A timer-driven or background broadcast failed for good.
    BroadcastFailed { kind: MessageKind, reason: String },
}

/// A point-in-time copy of the actor's view.
#[derive(Debug, Clone)]
pub struct RoomView {
    pub self_id: PeerId,
    pub joined: bool,
    pub role: Role,
    pub state: RoomState,
    pub connected_peers: Vec<PeerId>,
    /// Liveness-triggered re-elections since the node started.
    pub reelections: u32,
}

impl RoomView {
    pub fn is_host(&self) -> bool {
        self.role.is_host()
    }
}

/// Commands sent to the room actor through its channel.
pub(crate) enum RoomCommand {
    Join {
        room_id: String,
        name: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    StartGame {
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Chat {
        text: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Emote {
        emote: String,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    ReportProgress {
        completed_lines: u8,
        has_won: bool,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    GetState {
        reply: oneshot::Sender<RoomView>,
    },
    Shutdown,
}

/// Handle to a running room actor.
///
/// Cheap to clone. When the last handle is dropped the actor tears
/// itself down.
#[derive(Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> RoomCommand,
    ) -> Result<R, RoomError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(make(reply_tx))
            .await
            .map_err(|_| RoomError::Unavailable)?;
        reply_rx.await.map_err(|_| RoomError::Unavailable)
    }

    /// Starts the network (if needed) and joins `room_id` as `name`.
    pub async fn join(
        &self,
        room_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<(), RoomError> {
        let (room_id, name) = (room_id.into(), name.into());
        self.request(|reply| RoomCommand::Join {
            room_id,
            name,
            reply,
        })
        .await?
    }

    /// Announces departure and resets local room state.
    ///
    /// Local state is reset even if the announcement fails; the error
    /// is still returned.
    pub async fn leave(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::Leave { reply }).await?
    }

    /// Starts the countdown now (host only, enough players, Waiting).
    pub async fn start_game(&self) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::StartGame { reply }).await?
    }

    /// Broadcasts a chat line. Resolves once the gate has sent it.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<(), RoomError> {
        let text = text.into();
        self.request(|reply| RoomCommand::Chat { text, reply }).await?
    }

    /// Broadcasts an emote code. Resolves once the gate has sent it.
    pub async fn send_emote(&self, emote: impl Into<String>) -> Result<(), RoomError> {
        let emote = emote.into();
        self.request(|reply| RoomCommand::Emote { emote, reply }).await?
    }

    /// Reports local progress computed outside the [`GameRules`] hook.
    /// Progress only ever moves forward within a round.
    pub async fn report_progress(&self, completed_lines: u8, has_won: bool) -> Result<(), RoomError> {
        self.request(|reply| RoomCommand::ReportProgress {
            completed_lines,
            has_won,
            reply,
        })
        .await?
    }

    /// Returns a copy of the actor's current view.
    pub async fn state(&self) -> Result<RoomView, RoomError> {
        self.request(|reply| RoomCommand::GetState { reply }).await
    }

    /// Stops the actor, the gate worker and the network.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.sender
            .send(RoomCommand::Shutdown)
            .await
            .map_err(|_| RoomError::Unavailable)
    }

    /// `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Spawns the room actor and its gate worker for one node.
///
/// Returns a handle and the node's event stream. The node's identity is
/// `transport.local_peer_id()`.
pub fn spawn_room<T, C, R>(
    transport: Arc<T>,
    codec: C,
    rules: R,
    config: RoomConfig,
) -> (RoomHandle, mpsc::UnboundedReceiver<RoomEvent>)
where
    T: Transport,
    C: Codec,
    R: GameRules,
{
    let config = config.validated();
    let codec = Arc::new(codec);
    let cancel = CancellationToken::new();
    let (role_tx, role_rx) = watch::channel(false);

    let gate = Arc::new(BroadcastGate::new(
        Arc::clone(&transport),
        Arc::clone(&codec),
        role_rx,
        config.gate.clone(),
    ));
    let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_gate_worker(
        Arc::clone(&gate),
        outbox_rx,
        report_tx,
        cancel.clone(),
    ));

    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport_rx = transport.subscribe();
    let self_id = transport.local_peer_id();

    let actor = RoomActor {
        self_id: self_id.clone(),
        name: String::new(),
        joined: false,
        election: ElectionCoordinator::new(self_id, config.election.clone()),
        directory: PeerDirectory::new(config.directory.clone()),
        dedup: MessageDeduplicator::new(config.dedup.clone()),
        timers: Timers::new(&config),
        config,
        transport,
        codec,
        gate,
        rules,
        state: RoomState::default(),
        role_tx,
        outbox: outbox_tx,
        events: event_tx,
        pending: HashSet::new(),
        sync: SyncWindow::default(),
        session: cancel.child_token(),
        cancel,
    };
    tokio::spawn(actor.run(cmd_rx, transport_rx, report_rx));

    (RoomHandle { sender: cmd_tx }, event_rx)
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

struct Timers {
    /// Host countdown seconds.
    countdown: TickScheduler,
    /// Follower: counts down locally when a host tick is overdue.
    countdown_mirror: TickScheduler,
    draw: TickScheduler,
    snapshot: TickScheduler,
    heartbeat: TickScheduler,
    /// Liveness, expiry, pruning, deferred sends.
    maintenance: TickScheduler,
    /// Finished → Waiting on the host.
    reset: Deadline,
    /// End of the current sync window.
    sync: Deadline,
}

impl Timers {
    fn new(config: &RoomConfig) -> Self {
        let mut heartbeat = TickScheduler::new(
            TickConfig::every(config.heartbeat_interval).with_jitter(config.heartbeat_interval / 4),
        );
        heartbeat.pause();
        Self {
            countdown: TickScheduler::idle(COUNTDOWN_STEP),
            countdown_mirror: TickScheduler::idle(COUNTDOWN_STEP * 3 / 2),
            draw: TickScheduler::idle(config.draw_interval),
            snapshot: TickScheduler::idle(config.snapshot_interval),
            heartbeat,
            maintenance: TickScheduler::every(config.maintenance_interval),
            reset: Deadline::new(),
            sync: Deadline::new(),
        }
    }
}

/// Catch-up state of a node that joined next to other peers.
#[derive(Debug, Default)]
struct SyncWindow {
    active: bool,
    /// Room traffic arrived during the current window.
    heard: bool,
    windows: u32,
}

fn toggle(timer: &mut TickScheduler, on: bool) {
    if on {
        timer.resume();
    } else {
        timer.pause();
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct RoomActor<T: Transport, C: Codec, R: GameRules> {
    self_id: PeerId,
    name: String,
    joined: bool,
    config: RoomConfig,
    transport: Arc<T>,
    codec: Arc<C>,
    gate: Arc<BroadcastGate<T, C>>,
    rules: R,
    state: RoomState,
    election: ElectionCoordinator,
    directory: PeerDirectory,
    dedup: MessageDeduplicator,
    /// Publishes the host flag to the gate.
    role_tx: watch::Sender<bool>,
    outbox: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<RoomEvent>,
    /// Self-describing kinds the cooldown held back; resent fresh later.
    pending: HashSet<MessageKind>,
    sync: SyncWindow,
    timers: Timers,
    /// Scopes outbound sends to one membership; cancelled on leave.
    session: CancellationToken,
    cancel: CancellationToken,
}

impl<T: Transport, C: Codec, R: GameRules> RoomActor<T, C, R> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<RoomCommand>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        mut reports: mpsc::UnboundedReceiver<GateReport>,
    ) {
        info!(self_id = %self.self_id, "room actor started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd).await {
                        break;
                    }
                }
                Some(event) = transport_events.recv() => self.handle_transport_event(event),
                Some(report) = reports.recv() => self.handle_gate_report(report),
                _ = self.timers.countdown.wait_for_tick() => self.on_countdown_tick(),
                _ = self.timers.countdown_mirror.wait_for_tick() => self.on_countdown_mirror_tick(),
                _ = self.timers.draw.wait_for_tick() => self.on_draw_tick(),
                _ = self.timers.snapshot.wait_for_tick() => self.request(MessageKind::RoomSnapshot),
                _ = self.timers.heartbeat.wait_for_tick() => self.on_heartbeat_tick(),
                _ = self.timers.maintenance.wait_for_tick() => self.on_maintenance_tick(),
                _ = self.timers.reset.wait() => self.on_reset_deadline(),
                _ = self.timers.sync.wait() => self.on_sync_deadline(),
            }
            self.sync_timers();
        }

        self.cancel.cancel();
        self.role_tx.send_replace(false);
        if let Err(e) = self.transport.stop_network().await {
            debug!(error = %e, "stopping network on teardown failed");
        }
        info!(self_id = %self.self_id, "room actor stopped");
    }

    // -- Commands ---------------------------------------------------------

    /// Returns `false` when the actor should stop.
    async fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join {
                room_id,
                name,
                reply,
            } => {
                let result = self.join(room_id, name).await;
                let _ = reply.send(result);
            }
            RoomCommand::Leave { reply } => self.leave(reply),
            RoomCommand::StartGame { reply } => {
                let _ = reply.send(self.start_game());
            }
            RoomCommand::Chat { text, reply } => self.user_broadcast(MessageBody::Chat { text }, reply),
            RoomCommand::Emote { emote, reply } => {
                self.user_broadcast(MessageBody::Emote { emote }, reply)
            }
            RoomCommand::ReportProgress {
                completed_lines,
                has_won,
                reply,
            } => {
                let result = if self.joined {
                    self.update_local_progress(completed_lines, has_won);
                    Ok(())
                } else {
                    Err(RoomError::NotJoined)
                };
                let _ = reply.send(result);
            }
            RoomCommand::GetState { reply } => {
                let _ = reply.send(self.view());
            }
            RoomCommand::Shutdown => {
                info!(self_id = %self.self_id, "room shutting down");
                return false;
            }
        }
        true
    }

    async fn join(&mut self, room_id: String, name: String) -> Result<(), RoomError> {
        if self.joined {
            return Err(RoomError::AlreadyJoined(self.state.room_id.clone()));
        }
        if room_id.is_empty() || room_id.len() > MAX_LABEL_LEN {
            return Err(RoomError::InvalidState(format!(
                "room id must be 1..={MAX_LABEL_LEN} bytes"
            )));
        }
        if name.len() > MAX_LABEL_LEN {
            return Err(RoomError::InvalidState(format!(
                "name must be at most {MAX_LABEL_LEN} bytes"
            )));
        }

        self.transport
            .start_network()
            .await
            .map_err(|e| RoomError::Network(e.to_string()))?;

        let now = Instant::now();
        let peers = self.transport.connected_peers();
        let alone = peers.is_empty();
        for peer in peers {
            self.directory.connect(peer, now);
        }

        self.session = self.cancel.child_token();
        self.name = name;
        self.state = RoomState::new(room_id.clone());
        self.state
            .merge_incremental(&PlayerRecord::new(self.self_id.clone(), self.name.clone()));
        self.joined = true;
        info!(%room_id, self_id = %self.self_id, "joined room");
        self.emit(RoomEvent::Joined { room_id });

        if alone {
            self.reelect(now);
            self.request(MessageKind::PlayerJoined);
        } else {
            self.begin_sync();
        }
        Ok(())
    }

    fn leave(&mut self, reply: oneshot::Sender<Result<(), RoomError>>) {
        if !self.joined {
            let _ = reply.send(Err(RoomError::NotJoined));
            return;
        }
        // Whatever this membership still has queued or in backoff is
        // abandoned; only the goodbye goes out.
        self.session.cancel();
        self.session = self.cancel.child_token();
        let goodbye = self.message(MessageBody::PlayerLeft {
            id: self.self_id.clone(),
        });
        self.queue(goodbye, Delivery::Reply(reply));

        info!(room_id = %self.state.room_id, self_id = %self.self_id, "left room");
        self.joined = false;
        self.state.clear();
        self.election.reset();
        self.dedup.clear();
        self.pending.clear();
        self.sync = SyncWindow::default();
        self.timers.sync.disarm();
        self.rules.on_reset();
        self.role_tx.send_replace(false);
        self.emit(RoomEvent::Left);
    }

    fn start_game(&mut self) -> Result<(), RoomError> {
        if !self.joined {
            return Err(RoomError::NotJoined);
        }
        if !self.election.is_host() {
            return Err(RoomError::NotHost);
        }
        if self.state.phase != Phase::Waiting {
            return Err(RoomError::InvalidState(format!(
                "cannot start a round from {}",
                self.state.phase
            )));
        }
        let present = self.present_players();
        if present < self.config.min_players {
            return Err(RoomError::InvalidState(format!(
                "need at least {} players, have {present}",
                self.config.min_players
            )));
        }
        self.begin_countdown();
        Ok(())
    }

    fn user_broadcast(&mut self, body: MessageBody, reply: oneshot::Sender<Result<(), RoomError>>) {
        if !self.joined {
            let _ = reply.send(Err(RoomError::NotJoined));
            return;
        }
        let msg = self.message(body);
        self.queue(msg, Delivery::Reply(reply));
    }

    fn view(&self) -> RoomView {
        RoomView {
            self_id: self.self_id.clone(),
            joined: self.joined,
            role: self.election.role().clone(),
            state: self.state.clone(),
            connected_peers: self.directory.connected(),
            reelections: self.election.reelections(),
        }
    }

    // -- Transport --------------------------------------------------------

    fn handle_transport_event(&mut self, event: TransportEvent) {
        let now = Instant::now();
        match event {
            TransportEvent::PeerConnected(id) => {
                if !self.directory.connect(id.clone(), now) || !self.joined {
                    return;
                }
                self.state.refresh_heartbeat(&id);
                self.reelect(now);
                // Let the newcomer learn about us.
                self.request(MessageKind::PlayerJoined);
                if self.election.is_host() {
                    self.request(MessageKind::RoomSnapshot);
                }
            }
            TransportEvent::PeerDisconnected(id) => {
                if let Err(e) = self.directory.disconnect(&id, now) {
                    debug!(error = %e, "disconnect for unknown peer");
                }
                if !self.joined {
                    return;
                }
                if self.state.mark_disconnected(&id) {
                    self.emit(RoomEvent::PlayerDisconnected(id));
                }
                self.reelect(now);
                if self.election.is_host() {
                    self.request(MessageKind::RoomSnapshot);
                }
            }
            TransportEvent::MessageReceived { from, bytes } => self.handle_frame(&from, &bytes, now),
        }
    }

    fn handle_frame(&mut self, from: &PeerId, bytes: &[u8], now: Instant) {
        let msg = match self.codec.decode(bytes) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%from, error = %e, "dropping undecodable frame");
                return;
            }
        };
        if !self.joined {
            trace!(%from, kind = ?msg.kind(), "not in a room, ignoring message");
            return;
        }
        if msg.room_id != self.state.room_id {
            debug!(%from, room_id = %msg.room_id, "message for another room");
            return;
        }
        if msg.sender_id.same_peer(&self.self_id) {
            return;
        }
        if !self.dedup.should_process(&msg.identity(), now) {
            debug!(%from, kind = ?msg.kind(), "duplicate message dropped");
            return;
        }
        self.directory.touch(&msg.sender_id, now);
        if self.sync.active {
            self.sync.heard = true;
        }
        self.dispatch(msg, now);
    }

    fn dispatch(&mut self, msg: GameMessage, now: Instant) {
        let kind = msg.kind();
        let GameMessage {
            sender_id,
            sender_name,
            body,
            ..
        } = msg;

        if kind.is_host_only() && self.sync.active {
            match body {
                MessageBody::RoomSnapshot(snapshot) => self.catch_up(&sender_id, &snapshot, now),
                _ => trace!(?kind, from = %sender_id, "still syncing, waiting for a snapshot"),
            }
            return;
        }
        if kind.is_host_only() && !self.accept_host_message(&sender_id, &body, now) {
            return;
        }

        match body {
            MessageBody::PlayerJoined { id, name } => {
                self.on_player_joined(PlayerRecord::new(id, name), now)
            }
            MessageBody::PlayerLeft { id } => self.on_player_left(&id, now),
            MessageBody::RoomSnapshot(snapshot) => self.on_snapshot(&snapshot, now),
            MessageBody::NumberDrawn { number } => self.on_number_drawn(number),
            MessageBody::Heartbeat { id, .. } => {
                self.election.record_heartbeat(&sender_id, now);
                self.state.refresh_heartbeat(&id);
            }
            MessageBody::TurnChange { next, turn_index } => {
                self.state.apply_turn(next.clone(), turn_index);
                self.emit(RoomEvent::TurnChanged { next, turn_index });
            }
            MessageBody::GameStart { countdown } => self.on_game_start(countdown),
            MessageBody::CountdownTick { remaining } => self.on_countdown_update(remaining),
            MessageBody::PlayerProgress {
                id,
                completed_lines,
                has_won,
            } => self.on_progress(&id, completed_lines, has_won),
            MessageBody::GameWon { winner, name } => self.on_game_won(winner, name),
            MessageBody::GameReset => {
                self.reset_round_locally();
                self.emit(RoomEvent::PhaseChanged(Phase::Waiting));
            }
            MessageBody::Chat { text } => self.emit(RoomEvent::Chat {
                from: sender_id,
                name: sender_name,
                text,
            }),
            MessageBody::Emote { emote } => self.emit(RoomEvent::Emote {
                from: sender_id,
                name: sender_name,
                emote,
            }),
            MessageBody::Raw { data } => self.emit(RoomEvent::Raw {
                from: sender_id,
                data,
            }),
            MessageBody::Unknown { tag, .. } => {
                debug!(tag, from = %sender_id, "ignoring unknown message kind");
            }
        }
    }

    /// A host-only message is an implicit claim to be host. Accept it
    /// only if the election agrees.
    fn accept_host_message(&mut self, sender: &PeerId, body: &MessageBody, now: Instant) -> bool {
        let asserted = match body {
            MessageBody::RoomSnapshot(RoomSnapshot {
                host_id: Some(host), ..
            }) if !host.is_empty() => host.clone(),
            _ => sender.clone(),
        };
        match self.election.observe_assertion(&asserted, now) {
            Ok(outcome) => {
                self.on_election_outcome(outcome);
                true
            }
            Err(e) => {
                debug!(error = %e, kind = ?body.kind(), "dropping message from non-authoritative host");
                if self.election.is_host() {
                    self.absorb_rival(sender, body, now);
                }
                false
            }
        }
    }

    /// A rival host that lost to us may still have run a round we never
    /// saw. Take over whatever it has that we don't.
    fn absorb_rival(&mut self, rival: &PeerId, body: &MessageBody, now: Instant) {
        match body {
            MessageBody::RoomSnapshot(snapshot) => {
                let changes = self.state.inherit(snapshot);
                if changes == SnapshotChanges::default() {
                    return;
                }
                info!(room_id = %self.state.room_id, %rival, phase = %self.state.phase, "inherited rival host's round");
                self.report_changes(&changes);
                if changes.membership_changed() {
                    self.membership_changed(now);
                } else {
                    self.request(MessageKind::RoomSnapshot);
                }
            }
            MessageBody::NumberDrawn { number } if self.state.phase == Phase::Playing => {
                self.on_number_drawn(*number);
            }
            _ => {}
        }
    }

    // -- Sync -------------------------------------------------------------

    fn begin_sync(&mut self) {
        debug!(room_id = %self.state.room_id, window = ?self.config.sync_window, "syncing with room before electing");
        self.sync = SyncWindow {
            active: true,
            heard: false,
            windows: 1,
        };
        self.timers.sync.arm(self.config.sync_window);
    }

    /// First snapshot while syncing: follow its sender and take its state.
    fn catch_up(&mut self, sender: &PeerId, snapshot: &RoomSnapshot, now: Instant) {
        let host = match &snapshot.host_id {
            Some(h) if !h.is_empty() && !h.same_peer(&self.self_id) => h.clone(),
            _ => sender.clone(),
        };
        let outcome = self.election.follow(&host, now);
        self.on_election_outcome(outcome);
        self.on_snapshot(snapshot, now);
        self.finish_sync(now);
    }

    fn on_sync_deadline(&mut self) {
        if !self.sync.active {
            return;
        }
        if self.sync.heard && self.sync.windows < MAX_SYNC_WINDOWS {
            self.sync.windows += 1;
            self.sync.heard = false;
            debug!(window = self.sync.windows, "room is talking but no snapshot yet, extending sync");
            self.timers.sync.arm(self.config.sync_window);
            return;
        }
        self.finish_sync(Instant::now());
    }

    fn finish_sync(&mut self, now: Instant) {
        if !self.sync.active {
            return;
        }
        self.sync = SyncWindow::default();
        self.timers.sync.disarm();
        info!(room_id = %self.state.room_id, players = self.state.players().len(), phase = %self.state.phase, "synced with room");
        self.reelect(now);
        self.request(MessageKind::PlayerJoined);
        let me = self.local_record();
        if me.completed_lines > 0 || me.has_won {
            self.request(MessageKind::PlayerProgress);
        }
    }

    // -- Incoming room messages -------------------------------------------

    fn on_player_joined(&mut self, record: PlayerRecord, now: Instant) {
        self.directory.connect(record.id.clone(), now);
        let id = record.id.clone();
        if self.state.merge_incremental(&record) == MergeOutcome::Added {
            info!(room_id = %self.state.room_id, player = %id, "player joined");
            self.emit(RoomEvent::PlayerJoined(record));
            self.membership_changed(now);
        } else if self.election.is_host() {
            // A known peer re-announcing usually just adopted us as host.
            self.request(MessageKind::RoomSnapshot);
        }
    }

    fn on_player_left(&mut self, id: &PeerId, now: Instant) {
        // Still on the air, but out of the room and out of elections
        // until it announces itself again.
        self.directory.remove(id);
        if self.state.remove_player(id).is_some() {
            info!(room_id = %self.state.room_id, player = %id, "player left");
            self.emit(RoomEvent::PlayerLeft(id.clone()));
            self.membership_changed(now);
        } else {
            self.reelect(now);
        }
    }

    fn on_snapshot(&mut self, snapshot: &RoomSnapshot, now: Instant) {
        if !self.state.same_round(snapshot) {
            // The host moved on to another round while we weren't listening.
            self.reset_round_locally();
        }

        let me = self.local_record();
        let changes = self.state.apply_snapshot(snapshot, &me);
        self.state.host_id = self.election.host().cloned();
        if self.state.phase == Phase::Countdown {
            self.timers.countdown_mirror.restart();
        }

        self.report_changes(&changes);
        if changes.membership_changed() {
            self.reelect(now);
        }
    }

    /// Emits events for, and scores, what a snapshot changed.
    fn report_changes(&mut self, changes: &SnapshotChanges) {
        for id in &changes.added {
            if let Some(p) = self.state.player(id) {
                self.emit(RoomEvent::PlayerJoined(p.clone()));
            }
        }
        for id in &changes.removed {
            self.emit(RoomEvent::PlayerLeft(id.clone()));
        }
        if let Some((from, to)) = changes.phase {
            info!(room_id = %self.state.room_id, %from, %to, "phase changed by snapshot");
            self.emit(RoomEvent::PhaseChanged(to));
        }
        for n in changes.new_numbers.iter().copied() {
            self.emit(RoomEvent::NumberDrawn(n));
            self.score_number(n);
        }
    }

    fn on_number_drawn(&mut self, number: u16) {
        if !self.state.apply_number_drawn(number) {
            debug!(number, "number already drawn");
            return;
        }
        self.enter_phase(Phase::Playing);
        self.emit(RoomEvent::NumberDrawn(number));
        self.score_number(number);
    }

    fn on_game_start(&mut self, countdown: u8) {
        if !matches!(self.state.phase, Phase::Waiting | Phase::Countdown) {
            self.reset_round_locally();
        }
        self.state.countdown = countdown;
        self.enter_phase(Phase::Countdown);
        self.timers.countdown_mirror.restart();
        self.emit(RoomEvent::CountdownTick(countdown));
    }

    /// The host's tick overrides our local mirror. A value we already
    /// reached on our own is not announced twice.
    fn on_countdown_update(&mut self, remaining: u8) {
        if self.state.phase == Phase::Waiting {
            self.enter_phase(Phase::Countdown);
        }
        if self.state.phase != Phase::Countdown {
            return;
        }
        self.timers.countdown_mirror.restart();
        if self.state.countdown != remaining {
            self.state.countdown = remaining;
            self.emit(RoomEvent::CountdownTick(remaining));
        }
        if remaining == 0 {
            self.enter_phase(Phase::Playing);
        }
    }

    fn on_progress(&mut self, id: &PeerId, completed_lines: u8, has_won: bool) {
        if id.same_peer(&self.self_id) {
            return;
        }
        if self.state.merge_progress(id, completed_lines, has_won) == MergeOutcome::Updated {
            if let Some(p) = self.state.player(id) {
                self.emit(RoomEvent::ProgressUpdated {
                    id: id.clone(),
                    completed_lines: p.completed_lines,
                    has_won: p.has_won,
                });
            }
            self.check_winner();
        }
    }

    fn on_game_won(&mut self, winner: PeerId, name: String) {
        let lines = self
            .state
            .player(&winner)
            .map_or(0, |p| p.completed_lines);
        self.state.merge_progress(&winner, lines, true);
        self.enter_phase(Phase::Finished);
        info!(room_id = %self.state.room_id, %winner, "game won");
        self.emit(RoomEvent::GameWon { winner, name });
    }

    // -- Timers -----------------------------------------------------------

    fn on_countdown_tick(&mut self) {
        if !self.joined || !self.election.is_host() || self.state.phase != Phase::Countdown {
            return;
        }
        let remaining = self.state.countdown.saturating_sub(1);
        self.state.countdown = remaining;
        self.emit(RoomEvent::CountdownTick(remaining));
        self.send(MessageBody::CountdownTick { remaining });
        if remaining == 0 {
            info!(room_id = %self.state.room_id, "round started");
            self.enter_phase(Phase::Playing);
            self.timers.draw.restart();
        }
    }

    /// Follower: no host tick for a while, so step the countdown locally.
    /// Nothing is broadcast.
    fn on_countdown_mirror_tick(&mut self) {
        if !self.joined || self.election.is_host() || self.state.phase != Phase::Countdown {
            return;
        }
        let remaining = self.state.countdown.saturating_sub(1);
        trace!(remaining, "host countdown tick overdue, counting locally");
        self.state.countdown = remaining;
        self.emit(RoomEvent::CountdownTick(remaining));
        if remaining == 0 {
            self.enter_phase(Phase::Playing);
        }
    }

    fn on_draw_tick(&mut self) {
        if !self.joined || !self.election.is_host() || self.state.phase != Phase::Playing {
            return;
        }
        let unused: Vec<u16> = (1..=self.config.number_pool)
            .filter(|n| !self.state.drawn().contains(n))
            .collect();
        if unused.is_empty() {
            info!(room_id = %self.state.room_id, "number pool exhausted, finishing without a winner");
            self.enter_phase(Phase::Finished);
            self.request(MessageKind::RoomSnapshot);
            return;
        }

        let number = unused[rand::rng().random_range(0..unused.len())];
        self.state.apply_number_drawn(number);
        debug!(room_id = %self.state.room_id, number, drawn = self.state.drawn().len(), "number drawn");
        self.send(MessageBody::NumberDrawn { number });
        self.emit(RoomEvent::NumberDrawn(number));
        self.advance_turn();
        self.score_number(number);
        self.check_winner();
    }

    fn on_heartbeat_tick(&mut self) {
        if !self.joined || self.sync.active {
            return;
        }
        self.send(MessageBody::Heartbeat {
            id: self.self_id.clone(),
            name: self.name.clone(),
        });
    }

    fn on_maintenance_tick(&mut self) {
        let now = Instant::now();
        self.dedup.prune(now);
        let expired = self.directory.expire_stale(now);
        self.directory.cleanup_expired();
        if !self.joined {
            return;
        }

        if self.election.is_host() {
            let mut changed = false;
            for id in expired {
                if self.state.remove_player(&id).is_some() {
                    info!(room_id = %self.state.room_id, player = %id, "player expired after disconnect grace");
                    self.emit(RoomEvent::PlayerLeft(id));
                    changed = true;
                }
            }
            if changed {
                self.membership_changed(now);
            }
        }

        let outcome = self.election.check_liveness(&self.candidates(), now);
        self.on_election_outcome(outcome);

        for kind in self.pending.clone() {
            self.request(kind);
        }
        self.maybe_auto_start();
    }

    fn on_reset_deadline(&mut self) {
        if !self.joined || !self.election.is_host() || self.state.phase != Phase::Finished {
            return;
        }
        self.send(MessageBody::GameReset);
        self.reset_round_locally();
        info!(room_id = %self.state.room_id, "round reset");
        self.emit(RoomEvent::PhaseChanged(Phase::Waiting));
        self.request(MessageKind::RoomSnapshot);
        self.maybe_auto_start();
    }

    /// Runs or parks each timer according to role and phase.
    fn sync_timers(&mut self) {
        let joined = self.joined;
        let host = joined && self.election.is_host();
        let phase = self.state.phase;

        toggle(&mut self.timers.countdown, host && phase == Phase::Countdown);
        toggle(
            &mut self.timers.countdown_mirror,
            joined && !host && phase == Phase::Countdown,
        );
        toggle(&mut self.timers.draw, host && phase == Phase::Playing);
        toggle(&mut self.timers.snapshot, host);
        toggle(&mut self.timers.heartbeat, joined && !self.sync.active);

        if host && phase == Phase::Finished {
            if !self.timers.reset.is_armed() {
                self.timers.reset.arm(self.config.reset_grace);
            }
        } else {
            self.timers.reset.disarm();
        }
    }

    // -- Game flow (host) -------------------------------------------------

    fn begin_countdown(&mut self) {
        let countdown = self.config.countdown_secs;
        self.state.countdown = countdown;
        self.enter_phase(Phase::Countdown);
        self.timers.countdown.restart();
        self.send(MessageBody::GameStart { countdown });
        self.emit(RoomEvent::CountdownTick(countdown));
    }

    fn maybe_auto_start(&mut self) {
        if self.joined
            && self.config.auto_start
            && self.election.is_host()
            && self.state.phase == Phase::Waiting
            && self.present_players() >= self.config.min_players
        {
            info!(room_id = %self.state.room_id, players = self.present_players(), "auto-starting round");
            self.begin_countdown();
        }
    }

    fn advance_turn(&mut self) {
        let rotation: Vec<PeerId> = self.state.rotation().iter().map(|p| p.id.clone()).collect();
        if rotation.is_empty() {
            return;
        }
        let index = match &self.state.turn {
            Some((current, _)) => rotation
                .iter()
                .position(|p| p == current)
                .map_or(0, |i| (i + 1) % rotation.len()),
            None => 0,
        };
        let next = rotation[index].clone();
        let turn_index = (index % 256) as u8;
        self.state.apply_turn(next.clone(), turn_index);
        self.send(MessageBody::TurnChange {
            next: next.clone(),
            turn_index,
        });
        self.emit(RoomEvent::TurnChanged { next, turn_index });
    }

    fn check_winner(&mut self) {
        if !self.election.is_host() || self.state.phase != Phase::Playing {
            return;
        }
        let Some(winner) = self.state.winner(self.config.win_lines).cloned() else {
            return;
        };
        self.state
            .merge_progress(&winner.id, winner.completed_lines, true);
        self.enter_phase(Phase::Finished);
        info!(room_id = %self.state.room_id, winner = %winner.id, lines = winner.completed_lines, "game won");
        self.send(MessageBody::GameWon {
            winner: winner.id.clone(),
            name: winner.name.clone(),
        });
        self.emit(RoomEvent::GameWon {
            winner: winner.id,
            name: winner.name,
        });
    }

    // -- Local player -----------------------------------------------------

    fn local_record(&self) -> PlayerRecord {
        self.state
            .player(&self.self_id)
            .cloned()
            .unwrap_or_else(|| PlayerRecord::new(self.self_id.clone(), self.name.clone()))
    }

    fn score_number(&mut self, number: u16) {
        let lines = self.rules.on_number_drawn(number, self.state.drawn());
        self.update_local_progress(lines, lines >= self.config.win_lines);
    }

    fn update_local_progress(&mut self, completed_lines: u8, has_won: bool) {
        let id = self.self_id.clone();
        if self.state.merge_progress(&id, completed_lines, has_won) != MergeOutcome::Updated {
            return;
        }
        let me = self.local_record();
        self.emit(RoomEvent::ProgressUpdated {
            id,
            completed_lines: me.completed_lines,
            has_won: me.has_won,
        });
        self.request(MessageKind::PlayerProgress);
        self.check_winner();
    }

    fn reset_round_locally(&mut self) {
        self.state.reset_for_new_round();
        self.rules.on_reset();
    }

    // -- Election ---------------------------------------------------------

    /// Connected peers that are in the room, plus the host we already
    /// follow even if its snapshot hasn't reached us yet. Peers merely
    /// on the air don't get a vote.
    fn candidates(&self) -> Vec<PeerId> {
        let host = self.election.host();
        self.directory
            .connected()
            .into_iter()
            .filter(|id| self.state.contains(id) || host == Some(id))
            .collect()
    }

    /// No-op while syncing: the room's host keeps authority until we
    /// have its state.
    fn reelect(&mut self, now: Instant) {
        if self.sync.active {
            return;
        }
        let outcome = self.election.evaluate(&self.candidates(), now);
        self.on_election_outcome(outcome);
    }

    fn membership_changed(&mut self, now: Instant) {
        self.reelect(now);
        if self.election.is_host() {
            self.request(MessageKind::RoomSnapshot);
        }
        self.maybe_auto_start();
    }

    fn on_election_outcome(&mut self, outcome: ElectionOutcome) {
        let ElectionOutcome::Changed { current, host, .. } = outcome else {
            return;
        };
        let is_host = current.is_host();
        self.state.host_id = Some(host.clone());
        self.role_tx.send_replace(is_host);
        self.emit(RoomEvent::HostChanged {
            host,
            is_self: is_host,
        });
        if is_host {
            self.request(MessageKind::RoomSnapshot);
        } else {
            // Make sure the new host has us in its snapshot.
            self.request(MessageKind::PlayerJoined);
        }
    }

    // -- Outbound ---------------------------------------------------------

    fn message(&self, body: MessageBody) -> GameMessage {
        GameMessage::new(
            self.self_id.clone(),
            self.name.clone(),
            self.state.room_id.clone(),
            body,
        )
    }

    fn queue(&self, msg: GameMessage, delivery: Delivery) {
        let outbound = Outbound {
            msg,
            delivery,
            session: self.session.clone(),
        };
        if self.outbox.send(outbound).is_err() {
            debug!("gate worker gone, message dropped");
        }
    }

    fn send(&self, body: MessageBody) {
        self.queue(self.message(body), Delivery::Report);
    }

    /// Sends a fresh copy of a self-describing message, or defers it
    /// while its kind is cooling down. Deferred kinds collapse into one
    /// send carrying the latest state. A syncing node stays silent.
    fn request(&mut self, kind: MessageKind) {
        if !self.joined || self.sync.active {
            return;
        }
        if !self.gate.cooldown_remaining(kind).is_zero() {
            self.pending.insert(kind);
            return;
        }
        self.pending.remove(&kind);
        let body = match kind {
            MessageKind::RoomSnapshot if self.election.is_host() => {
                MessageBody::RoomSnapshot(self.state.to_snapshot())
            }
            MessageKind::PlayerJoined => MessageBody::PlayerJoined {
                id: self.self_id.clone(),
                name: self.name.clone(),
            },
            MessageKind::PlayerProgress => {
                let me = self.local_record();
                MessageBody::PlayerProgress {
                    id: me.id,
                    completed_lines: me.completed_lines,
                    has_won: me.has_won,
                }
            }
            _ => return,
        };
        self.send(body);
    }

    fn handle_gate_report(&mut self, report: GateReport) {
        let GateReport { kind, error } = report;
        match error {
            GateError::Cooldown { .. }
                if matches!(
                    kind,
                    MessageKind::RoomSnapshot | MessageKind::PlayerJoined | MessageKind::PlayerProgress
                ) =>
            {
                self.pending.insert(kind);
            }
            GateError::Cooldown { remaining, .. } => {
                trace!(?kind, ?remaining, "send skipped, cooling down");
            }
            GateError::NotHost(_) => debug!(?kind, "host-only message dropped after losing host role"),
            GateError::Cancelled => {}
            error => {
                warn!(?kind, error = %error, "broadcast failed");
                self.emit(RoomEvent::BroadcastFailed {
                    kind,
                    reason: error.to_string(),
                });
            }
        }
    }

    // -- Helpers ----------------------------------------------------------

    fn enter_phase(&mut self, phase: Phase) {
        if let Some(from) = self.state.set_phase(phase) {
            info!(room_id = %self.state.room_id, %from, to = %phase, "phase changed");
            self.emit(RoomEvent::PhaseChanged(phase));
        }
    }

    fn present_players(&self) -> usize {
        self.state.players().iter().filter(|p| p.connected).count()
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}
