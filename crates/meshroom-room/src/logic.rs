//! The `GameRules` trait: where card rules plug into the room.
//!
//! The room engine knows about drawn numbers and line counts but not
//! about cards. Whatever owns the local player's card implements
//! [`GameRules`]; the room actor calls it every time a new number is
//! applied locally and reports the resulting line count to the room.

/// Card rules for the local player.
///
/// Called from inside the room actor task, so implementations must be
/// `Send + 'static`. Calls are synchronous and should be cheap.
pub trait GameRules: Send + 'static {
    /// A number was drawn. `drawn` is every number drawn this round,
    /// `number` included, in draw order.
    ///
    /// Returns how many lines the local player has completed so far.
    /// The room only ever moves that count upward within a round.
    fn on_number_drawn(&mut self, number: u16, drawn: &[u16]) -> u8;

    /// The room went back to the lobby. Clear the card. Default: no-op.
    fn on_reset(&mut self) {}
}

/// Rules that never complete a line. Useful for spectator-ish nodes and
/// for tests that only exercise synchronization.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRules;

impl GameRules for NoRules {
    fn on_number_drawn(&mut self, _number: u16, _drawn: &[u16]) -> u8 {
        0
    }
}

impl<F> GameRules for F
where
    F: FnMut(u16, &[u16]) -> u8 + Send + 'static,
{
    fn on_number_drawn(&mut self, number: u16, drawn: &[u16]) -> u8 {
        self(number, drawn)
    }
}
