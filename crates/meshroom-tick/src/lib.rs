//! Periodic timers for Meshroom.
//!
//! Everything time-driven in a room runs off a [`TickScheduler`]: the
//! one-second countdown, the draw loop, snapshot re-broadcasts,
//! heartbeats, host liveness checks, dedup pruning. One-shot delays
//! (the post-game reset grace) use a [`Deadline`].
//!
//! # Idle timers
//!
//! A scheduler with no period, or one that is paused, makes
//! [`TickScheduler::wait_for_tick`] pend forever. The same goes for a
//! disarmed [`Deadline`]. That lets the room actor keep every timer as a
//! branch of a single `tokio::select!` and switch them on and off as the
//! phase changes:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* handle commands */ }
//!         _ = countdown.wait_for_tick() => { /* only fires in Countdown */ }
//!         _ = draws.wait_for_tick() => { /* only fires in Playing */ }
//!         _ = reset.wait() => { /* armed after a win */ }
//!     }
//! }
//! ```
//!
//! All deadlines are `tokio::time::Instant`s, so paused-clock tests
//! (`#[tokio::test(start_paused = true)]`) drive them deterministically.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick is observed late (the actor was busy, or the
/// scheduler wasn't polled for a while).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TickPolicy {
    /// Skip the missed tick(s) and resume from now.
    #[default]
    Skip,
    /// Fire up to `max_catchup` missed ticks back to back.
    CatchUp {
        /// Hard cap on consecutive catch-up ticks.
        max_catchup: u32,
    },
    /// Keep the original cadence; the next tick fires at its originally
    /// scheduled time.
    Drop,
}

/// Configuration for one timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickConfig {
    /// Tick period. `None` = never fires.
    pub period: Option<Duration>,
    /// Late-tick handling.
    pub policy: TickPolicy,
    /// Random delay (up to this much) added to the *first* tick, so peers
    /// that started together don't all transmit in the same instant.
    pub initial_jitter: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: None,
            policy: TickPolicy::default(),
            initial_jitter: Duration::ZERO,
        }
    }
}

impl TickConfig {
    /// Shortest accepted period.
    pub const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// A config that ticks every `period`.
    pub fn every(period: Duration) -> Self {
        Self {
            period: Some(period),
            ..Default::default()
        }
    }

    /// Adds first-tick jitter.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically by [`TickScheduler::new`]. Rules:
    /// - `period` raised to [`Self::MIN_PERIOD`] if shorter.
    /// - `initial_jitter` capped to one period.
    pub fn validated(mut self) -> Self {
        if let Some(period) = self.period {
            if period < Self::MIN_PERIOD {
                warn!(?period, "tick period below minimum, clamping");
                self.period = Some(Self::MIN_PERIOD);
            }
        }
        let cap = self.period.unwrap_or(Duration::ZERO);
        if self.initial_jitter > cap {
            self.initial_jitter = cap;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Tick info (returned to caller each tick)
// ---------------------------------------------------------------------------

/// Information about a fired tick, returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Monotonically increasing tick number (starts at 1, survives
    /// pause/resume).
    pub tick: u64,
    /// The configured period.
    pub period: Duration,
    /// `true` if this tick fired more than 10% of a period late.
    pub overrun: bool,
    /// How many ticks were skipped because of the overrun.
    pub ticks_skipped: u64,
}

/// Counters kept by every scheduler.
#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-period timer, meant to sit in a `select!` loop.
pub struct TickScheduler {
    config: TickConfig,
    tick_count: u64,
    /// When the next tick should fire.
    next_tick: Option<Instant>,
    paused: bool,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a running scheduler. The first tick fires one period (plus
    /// jitter) from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let next_tick = config.period.map(|period| {
            let jitter = if config.initial_jitter.is_zero() {
                Duration::ZERO
            } else {
                let max = config.initial_jitter.as_micros() as u64;
                Duration::from_micros(rand::rng().random_range(0..max))
            };
            Instant::now() + period + jitter
        });

        debug!(period = ?config.period, policy = ?config.policy, "tick scheduler created");

        Self {
            config,
            tick_count: 0,
            next_tick,
            paused: false,
            metrics: TickMetrics::default(),
        }
    }

    /// A running scheduler ticking every `period`, without jitter.
    pub fn every(period: Duration) -> Self {
        Self::new(TickConfig::every(period))
    }

    /// A scheduler ticking every `period` that starts paused. Call
    /// [`resume`](Self::resume) to start it.
    pub fn idle(period: Duration) -> Self {
        let mut s = Self::every(period);
        s.paused = true;
        s
    }

    /// Waits until the next tick is due.
    ///
    /// Pends forever when paused or without a period. Cancel-safe: if the
    /// future is dropped before it resolves, no state changes.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, period) = match (self.next_tick, self.config.period) {
            (Some(next), Some(period)) if !self.paused => (next, period),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > period / 10;
        let behind = (late_by.as_nanos() / period.as_nanos()) as u64;
        let mut ticks_skipped = 0;

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => {
                if overrun && behind > 0 {
                    ticks_skipped = behind;
                    warn!(tick = self.tick_count, skipped = behind, "tick overrun, skipping ahead");
                }
                now + period
            }
            TickPolicy::CatchUp { max_catchup } => {
                if behind <= u64::from(max_catchup) {
                    next + period
                } else {
                    ticks_skipped = behind - u64::from(max_catchup);
                    warn!(tick = self.tick_count, behind, max_catchup, "tick overrun, catch-up capped");
                    now + period
                }
            }
            TickPolicy::Drop => next + period,
        });

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            period,
            overrun,
            ticks_skipped,
        }
    }

    /// Stops ticking. Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            trace!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Starts ticking again; the next tick is one full period from now.
    /// Idempotent.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.rearm();
            trace!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    /// Pushes the next tick to one full period from now, whether or not
    /// the scheduler was paused.
    pub fn restart(&mut self) {
        self.paused = false;
        self.rearm();
    }

    fn rearm(&mut self) {
        if let Some(period) = self.config.period {
            self.next_tick = Some(Instant::now() + period);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether this scheduler will ever fire (has a period).
    pub fn is_periodic(&self) -> bool {
        self.config.period.is_some()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn period(&self) -> Option<Duration> {
        self.config.period
    }
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

/// A one-shot timer that can be armed and disarmed.
#[derive(Debug, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `after` from now, replacing any pending deadline.
    pub fn arm(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub fn disarm(&mut self) {
        self.at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// Resolves once when the deadline passes, then disarms itself.
    /// Pends forever while disarmed. Cancel-safe.
    pub async fn wait(&mut self) {
        let Some(at) = self.at else {
            return std::future::pending().await;
        };
        time::sleep_until(at).await;
        self.at = None;
    }
}
