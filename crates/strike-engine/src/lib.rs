//! `strike-engine` – the mission state machine.
//!
//! The largest component of the installation: round/level progression,
//! active-target tracking, scoring, multipliers, and the per-level arcade
//! mode activation logic. The engine consumes control events (staff console
//! commands, decoded hardware inputs) from the bus, renders target layouts
//! through the HAL, and broadcasts every player-facing state change back to
//! the bus.
//!
//! # Modules
//!
//! - [`rounds`] – [`LevelDef`], [`ArcadeMode`] and the authored
//!   [`RoundTable`] of level content.
//! - [`mission`] – [`ActiveMission`]: the live play-state of the currently
//!   installed level, including its timer tasks.
//! - [`engine`] – [`GameEngine`]: the state machine itself.
//!
//! # Level state machine
//!
//! `Idle → LevelStarting → LevelActive → LevelResolving(success|retry) →
//! (next LevelStarting | GameFinished)`, with `HardReset` available from
//! every state. A 15-minute session ceiling forces a hard reset regardless
//! of in-progress level state.

pub mod engine;
pub mod mission;
pub mod rounds;

pub use engine::{EngineConfig, EngineMsg, GameEngine, format_time};
pub use mission::{ActiveMission, ActiveTarget};
pub use rounds::{ArcadeMode, LevelDef, MultiplierConfig, RoundTable};
