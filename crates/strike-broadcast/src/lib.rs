//! `strike-broadcast` – event routing and client fan-out.
//!
//! Routes asynchronous traffic between the game engine, the HAL and the
//! networked front-ends without caring about gameplay semantics.
//!
//! # Modules
//!
//! - [`bus`] – [`EventBus`]: typed, lane-based publish/subscribe built on
//!   Tokio broadcast channels. Game events flow outward on one lane,
//!   control commands flow inward on the other.
//! - [`server`] – [`BroadcastServer`]: two WebSocket servers on separate
//!   ports, one for the staff console (bidirectional) and one for the
//!   passive displays (read-only), both fanning out the game lane as JSON
//!   and replaying the last known state to every new connection.

pub mod bus;
pub mod server;

pub use bus::EventBus;
pub use server::{BroadcastServer, DEFAULT_DISPLAY_PORT, DEFAULT_STAFF_PORT};
