//! [`EventBus`] – typed, lane-based publish/subscribe.
//!
//! Built on [`tokio::sync::broadcast`] so every subscriber receives every
//! message without any single subscriber blocking the others. Traffic is
//! split into two typed lanes:
//!
//! | Lane | Type | Direction |
//! |---|---|---|
//! | game | [`GameEvent`] | engine/HAL → staff console + displays |
//! | control | [`ControlEvent`] | staff console / hardware → engine |
//!
//! Cross-component mutation happens exclusively through these lanes; no
//! component ever touches another's state directly.

use strike_types::{ControlEvent, GameEvent, StrikeError};
use tokio::sync::broadcast;

/// Buffered events per lane before slow subscribers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    game: broadcast::Sender<GameEvent>,
    control: broadcast::Sender<ControlEvent>,
}

impl EventBus {
    /// Create a new bus; `capacity` applies to each lane independently.
    pub fn new(capacity: usize) -> Self {
        let (game, _) = broadcast::channel(capacity);
        let (control, _) = broadcast::channel(capacity);
        Self { game, control }
    }

    /// Publish a game event to every connected fan-out subscriber.
    ///
    /// Returns the number of active receivers, or [`StrikeError::Channel`]
    /// when nobody is listening (a normal condition the caller may ignore —
    /// a headless engine keeps running without clients).
    pub fn publish_game(&self, event: GameEvent) -> Result<usize, StrikeError> {
        self.game
            .send(event)
            .map_err(|e| StrikeError::Channel(format!("no game-lane subscribers: {e}")))
    }

    pub fn subscribe_game(&self) -> broadcast::Receiver<GameEvent> {
        self.game.subscribe()
    }

    /// Publish a control command toward the engine.
    pub fn publish_control(&self, event: ControlEvent) -> Result<usize, StrikeError> {
        self.control
            .send(event)
            .map_err(|e| StrikeError::Channel(format!("no control-lane subscribers: {e}")))
    }

    pub fn subscribe_control(&self) -> broadcast::Receiver<ControlEvent> {
        self.control.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
