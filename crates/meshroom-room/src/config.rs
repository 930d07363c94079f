//! Room configuration.

use std::time::Duration;

use meshroom_peer::{DedupConfig, DirectoryConfig, ElectionConfig};
use serde::{Deserialize, Serialize};

use crate::GateConfig;

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Configuration for a room: game constants, timer intervals, and the
/// settings of every component the room actor owns.
///
/// Every peer in a room should run the same values; only the host's
/// constants actually drive the game, but followers use the same
/// intervals for their mirrors and liveness checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Minimum players (host included) before a round can start.
    pub min_players: usize,

    /// Numbers are drawn from `1..=number_pool`. At most 255, since
    /// snapshots carry drawn numbers one byte each.
    pub number_pool: u16,

    /// Completed lines needed to win.
    pub win_lines: u8,

    /// Seconds counted down before play starts.
    pub countdown_secs: u8,

    /// Host: time between draws.
    pub draw_interval: Duration,

    /// Host: time between periodic full snapshots.
    pub snapshot_interval: Duration,

    /// Time between heartbeats.
    pub heartbeat_interval: Duration,

    /// Liveness checks, expiry sweeps, dedup pruning and deferred sends
    /// run at this period.
    pub maintenance_interval: Duration,

    /// Host: pause on Finished before resetting to Waiting.
    pub reset_grace: Duration,

    /// How long a node that joins next to other peers waits for a room
    /// snapshot before taking part in elections. Extended (up to three
    /// windows in total) while room traffic is still arriving.
    pub sync_window: Duration,

    /// Host: start the countdown as soon as enough players are present.
    pub auto_start: bool,

    pub election: ElectionConfig,
    pub dedup: DedupConfig,
    pub directory: DirectoryConfig,
    pub gate: GateConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            min_players: 2,
            number_pool: 99,
            win_lines: 5,
            countdown_secs: 5,
            draw_interval: Duration::from_secs(2),
            snapshot_interval: Duration::from_secs(8),
            heartbeat_interval: Duration::from_secs(5),
            maintenance_interval: Duration::from_secs(1),
            reset_grace: Duration::from_secs(5),
            sync_window: Duration::from_secs(8),
            auto_start: true,
            election: ElectionConfig::default(),
            dedup: DedupConfig::default(),
            directory: DirectoryConfig::default(),
            gate: GateConfig::default(),
        }
    }
}

impl RoomConfig {
    /// Largest drawable number that still fits a snapshot byte.
    pub const MAX_NUMBER_POOL: u16 = 255;

    const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when a room is spawned. Rules:
    /// - `number_pool` clamped to `1..=255`.
    /// - `min_players`, `win_lines`, `countdown_secs` at least 1.
    /// - every interval at least 100 ms.
    pub fn validated(mut self) -> Self {
        if self.number_pool == 0 || self.number_pool > Self::MAX_NUMBER_POOL {
            let clamped = self.number_pool.clamp(1, Self::MAX_NUMBER_POOL);
            tracing::warn!(pool = self.number_pool, clamped, "number_pool out of range, clamping");
            self.number_pool = clamped;
        }
        if self.min_players == 0 {
            tracing::warn!("min_players is 0, using 1");
            self.min_players = 1;
        }
        if self.win_lines == 0 {
            tracing::warn!("win_lines is 0, using 1");
            self.win_lines = 1;
        }
        if self.countdown_secs == 0 {
            tracing::warn!("countdown_secs is 0, using 1");
            self.countdown_secs = 1;
        }
        for (name, interval) in [
            ("draw_interval", &mut self.draw_interval),
            ("snapshot_interval", &mut self.snapshot_interval),
            ("heartbeat_interval", &mut self.heartbeat_interval),
            ("maintenance_interval", &mut self.maintenance_interval),
            ("reset_grace", &mut self.reset_grace),
            ("sync_window", &mut self.sync_window),
        ] {
            if *interval < Self::MIN_INTERVAL {
                tracing::warn!(name, ?interval, "interval too short, clamping to 100ms");
                *interval = Self::MIN_INTERVAL;
            }
        }
        self.election = self.election.validated();
        self.dedup = self.dedup.validated();
        self.gate = self.gate.validated();
        self
    }
}
