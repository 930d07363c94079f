//! The broadcast gate: every outbound message passes through here.
//!
//! Checks, in order:
//!
//! 1. **Network**: the transport must be up. Zero connected peers is
//!    fine (a solo host still "broadcasts" into the void).
//! 2. **Authority**: host-only kinds are refused unless this node is
//!    currently host, as published on the role watch channel.
//! 3. **Cooldown**: the same kind can't go out again within the
//!    cooldown window. Game-flow kinds that must never be held back are
//!    exempt. The window starts when a send *succeeds*.
//! 4. **Retry**: a failed transmit is retried with linearly growing
//!    backoff. Authority is checked again before every retry, and a
//!    backoff sleep ends early when the send's session is cancelled.
//!
//! The room actor never awaits the gate. It hands messages to the
//! [`run_gate_worker`] task over a channel and carries on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use meshroom_protocol::{Codec, GameMessage, MessageKind};
use meshroom_transport::{MessageClass, Transport};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{GateError, RoomError};

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

/// Tuning for a [`BroadcastGate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Minimum spacing between two sends of the same non-emergency kind.
    ///
    /// Default: 3 seconds.
    pub cooldown: Duration,

    /// Total transmit attempts per message (first try included).
    ///
    /// Default: 3.
    pub max_attempts: u32,

    /// Backoff before retry `n` is `retry_base * n`.
    ///
    /// Default: 200 ms.
    pub retry_base: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3),
            max_attempts: 3,
            retry_base: Duration::from_millis(200),
        }
    }
}

impl GateConfig {
    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            tracing::warn!("gate max_attempts is 0, using 1");
            self.max_attempts = 1;
        }
        self
    }
}

/// Kinds exempt from the cooldown: the game can't progress without them.
pub fn is_emergency(kind: MessageKind) -> bool {
    matches!(
        kind,
        MessageKind::GameStart
            | MessageKind::CountdownTick
            | MessageKind::NumberDrawn
            | MessageKind::TurnChange
            | MessageKind::GameWon
            | MessageKind::GameReset
            | MessageKind::PlayerLeft
    )
}

fn class_for(kind: MessageKind) -> MessageClass {
    match kind {
        MessageKind::Heartbeat | MessageKind::Emote => MessageClass::Unreliable,
        _ => MessageClass::Reliable,
    }
}

// ---------------------------------------------------------------------------
// BroadcastGate
// ---------------------------------------------------------------------------

/// Guards a transport with readiness, authority, cooldown and retry
/// rules.
pub struct BroadcastGate<T: Transport, C: Codec> {
    transport: Arc<T>,
    codec: Arc<C>,
    /// `true` while this node is host.
    is_host: watch::Receiver<bool>,
    config: GateConfig,
    last_sent: Mutex<HashMap<MessageKind, Instant>>,
}

impl<T: Transport, C: Codec> BroadcastGate<T, C> {
    pub fn new(
        transport: Arc<T>,
        codec: Arc<C>,
        is_host: watch::Receiver<bool>,
        config: GateConfig,
    ) -> Self {
        Self {
            transport,
            codec,
            is_host,
            config: config.validated(),
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn last_sent(&self) -> MutexGuard<'_, HashMap<MessageKind, Instant>> {
        self.last_sent.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Time left before `kind` may be sent again. Zero for emergency
    /// kinds and kinds never sent.
    pub fn cooldown_remaining(&self, kind: MessageKind) -> Duration {
        if is_emergency(kind) {
            return Duration::ZERO;
        }
        match self.last_sent().get(&kind) {
            Some(at) => self.config.cooldown.saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    /// Runs the network, authority and cooldown checks without sending.
    ///
    /// # Errors
    /// [`GateError::NetworkUnavailable`], [`GateError::NotHost`] or
    /// [`GateError::Cooldown`].
    pub fn admit(&self, kind: MessageKind) -> Result<(), GateError> {
        if !self.transport.is_network_active() {
            return Err(GateError::NetworkUnavailable);
        }
        self.check_authority(kind)?;
        let remaining = self.cooldown_remaining(kind);
        if !remaining.is_zero() {
            return Err(GateError::Cooldown { kind, remaining });
        }
        Ok(())
    }

    fn check_authority(&self, kind: MessageKind) -> Result<(), GateError> {
        if kind.is_host_only() && !*self.is_host.borrow() {
            return Err(GateError::NotHost(kind));
        }
        Ok(())
    }

    /// Checks, encodes and broadcasts `msg`, retrying failed transmits.
    ///
    /// `session` scopes the send: once it is cancelled no further attempt
    /// is made. A host-only message that loses its authority between
    /// attempts is abandoned.
    ///
    /// # Errors
    /// Any [`admit`](Self::admit) error, [`GateError::Encode`],
    /// [`GateError::RetryExhausted`] after the last attempt, or
    /// [`GateError::Cancelled`] if `session` is cancelled first.
    pub async fn send(&self, msg: &GameMessage, session: &CancellationToken) -> Result<(), GateError> {
        let kind = msg.kind();
        if session.is_cancelled() {
            return Err(GateError::Cancelled);
        }
        self.admit(kind)?;
        let frame = self.codec.encode(msg)?;
        let class = class_for(kind);

        let attempts = self.config.max_attempts;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if session.is_cancelled() {
                return Err(GateError::Cancelled);
            }
            self.check_authority(kind)?;
            match self.transport.broadcast(&frame, class).await {
                Ok(()) => {
                    self.last_sent().insert(kind, Instant::now());
                    tracing::trace!(?kind, attempt, bytes = frame.len(), "broadcast sent");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(?kind, attempt, error = %e, "broadcast attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < attempts {
                let backoff = self.config.retry_base * attempt;
                tokio::select! {
                    _ = session.cancelled() => return Err(GateError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(GateError::RetryExhausted {
            attempts,
            last_error,
        })
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Who hears about the result of an outbound send.
pub(crate) enum Delivery {
    /// Report failures back to the room actor.
    Report,
    /// A caller is waiting on this send.
    Reply(oneshot::Sender<Result<(), RoomError>>),
}

/// A message queued for the gate.
pub(crate) struct Outbound {
    pub msg: GameMessage,
    pub delivery: Delivery,
    /// Cancelled when the room membership that queued this ends.
    pub session: CancellationToken,
}

/// A failed send the room actor should know about.
#[derive(Debug)]
pub(crate) struct GateReport {
    pub kind: MessageKind,
    pub error: GateError,
}

/// Drains the outbox in order until the channel closes or `cancel` fires.
///
/// Sends are awaited one at a time, so frames leave in the order the
/// actor queued them; a message stuck in backoff delays the ones behind
/// it but never the actor.
pub(crate) async fn run_gate_worker<T: Transport, C: Codec>(
    gate: Arc<BroadcastGate<T, C>>,
    mut outbox: mpsc::UnboundedReceiver<Outbound>,
    reports: mpsc::UnboundedSender<GateReport>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbox.recv() => next,
        };
        let Some(Outbound {
            msg,
            delivery,
            session,
        }) = next
        else {
            break;
        };

        let result = gate.send(&msg, &session).await;
        match delivery {
            Delivery::Reply(reply) => {
                let _ = reply.send(result.map_err(RoomError::from));
            }
            // Nobody is left to care about a finished session's failures.
            Delivery::Report if session.is_cancelled() => {}
            Delivery::Report => {
                if let Err(error) = result {
                    let _ = reports.send(GateReport {
                        kind: msg.kind(),
                        error,
                    });
                }
            }
        }
    }
    tracing::debug!("gate worker stopped");
}

// =========================================================================
// Tests
// =========================================================================
