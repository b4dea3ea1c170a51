//! `strike-hal` – the hardware abstraction layer.
//!
//! Single chokepoint between semantic output operations ("turn on target N
//! in green") and their execution. Depending on the configured [`HalMode`],
//! an operation is rendered as a serial command to the controller, as a
//! simulation event for the UI clients, or both — the two routes fire
//! independently.
//!
//! - [`colors`] – element-specific color resolution and UI hex values.
//! - [`remap`] – logical ↔ physical id translation for the cabinet wiring.
//!
//! The HAL also keeps a per-output state cache so redundant hardware writes
//! (same state, same color) are suppressed; simulation events still fire so
//! newly connected UIs converge. [`Hal::clear_state_cache`] drops the cache
//! when the hardware may be out of sync, e.g. after a controller reset.

pub mod colors;
pub mod remap;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use chrono::Utc;
use strike_serial::SerialLink;
use strike_types::{ids, ColorCode, GameEvent, HalMode, OutputState};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Capacity of the LED-event broadcast channel.
const LED_EVENT_CAPACITY: usize = 256;

/// The hardware abstraction layer. One instance per installation.
pub struct Hal {
    mode: StdMutex<HalMode>,
    link: StdMutex<Option<Arc<SerialLink>>>,
    /// Per-output `(state, wire color)` cache for write suppression.
    cache: StdMutex<HashMap<u8, (OutputState, char)>>,
    events: broadcast::Sender<GameEvent>,
}

impl Hal {
    pub fn new(mode: HalMode, link: Option<Arc<SerialLink>>) -> Arc<Self> {
        let (events, _) = broadcast::channel(LED_EVENT_CAPACITY);
        Arc::new(Self {
            mode: StdMutex::new(mode),
            link: StdMutex::new(link),
            cache: StdMutex::new(HashMap::new()),
            events,
        })
    }

    pub fn mode(&self) -> HalMode {
        *self.mode.lock().expect("mode lock poisoned")
    }

    pub fn set_mode(&self, mode: HalMode) {
        info!(%mode, "HAL mode set");
        *self.mode.lock().expect("mode lock poisoned") = mode;
    }

    /// Attach (or replace) the serial link after late discovery.
    pub fn attach_link(&self, link: Arc<SerialLink>) {
        *self.link.lock().expect("link lock poisoned") = Some(link);
    }

    /// Subscribe to simulation LED events ([`GameEvent::LedControl`] and
    /// [`GameEvent::BarLed`]).
    pub fn subscribe_leds(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    // ── Primary control surface ────────────────────────────────────────────

    /// Turn an output on with the requested color.
    pub fn turn_on_output(&self, output_id: u8, color: ColorCode) {
        self.apply(output_id, OutputState::On, color);
    }

    /// Turn an output off. Off is colorless: any requested color is forced
    /// to the off sentinel.
    pub fn turn_off_output(&self, output_id: u8) {
        self.apply(output_id, OutputState::Off, ColorCode::Off);
    }

    /// Set an output's state; off forces the off sentinel regardless of
    /// `color`.
    pub fn set_output(&self, output_id: u8, state: OutputState, color: ColorCode) {
        match state {
            OutputState::Off => self.turn_off_output(output_id),
            OutputState::On => self.turn_on_output(output_id, color),
        }
    }

    /// Color-code oriented entry point used by the game engine: an off code
    /// turns the element off, anything else turns it on. LED control for
    /// the input-only holes is ignored — they have no LEDs.
    pub fn control_led(&self, element_id: u8, color: ColorCode) {
        if ids::INNER_HOLES.contains(&element_id) {
            debug!(element_id, "ignoring LED control for input-only hole");
            return;
        }
        if color.is_off() {
            self.turn_off_output(element_id);
        } else {
            self.turn_on_output(element_id, color);
        }
    }

    /// Turn an output on, then schedule an unconditional turn-off after
    /// `duration`. There is no cancellation hook: a second flash before the
    /// first completes race-overwrites the off timer of the first, which is
    /// accepted behavior.
    pub fn flash_output(self: &Arc<Self>, output_id: u8, color: ColorCode, duration: Duration) {
        self.turn_on_output(output_id, color);
        let hal = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            hal.turn_off_output(output_id);
        });
    }

    /// Drive the progress bar LED, 0–100 %. Zero is clamped to 1 because
    /// the controller treats a zero byte as end-of-command.
    pub fn set_bar_led(&self, percentage: u8) {
        let pct = if percentage == 0 { 1 } else { percentage.min(100) };
        let mode = self.mode();

        if matches!(mode, HalMode::Hardware | HalMode::Both) {
            self.write_serial(format!("L01{}", pct as char));
        }
        if matches!(mode, HalMode::Simulation | HalMode::Both) {
            let _ = self.events.send(GameEvent::BarLed { percentage: pct });
        }
    }

    /// Drop the write-suppression cache. Use after a hardware reset, when
    /// the controller's real state no longer matches the cache.
    pub fn clear_state_cache(&self) {
        self.cache.lock().expect("cache lock poisoned").clear();
        info!("hardware state cache cleared");
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn apply(&self, output_id: u8, state: OutputState, color: ColorCode) {
        let wire = match state {
            OutputState::Off => ColorCode::Off.wire_char(),
            OutputState::On => colors::resolve(output_id, color).wire_char(),
        };
        let mode = self.mode();

        let fresh = {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            match cache.get(&output_id) {
                // Off matches on state alone: off is colorless.
                Some((cached_state, cached_wire))
                    if *cached_state == state
                        && (state == OutputState::Off || *cached_wire == wire) =>
                {
                    false
                }
                _ => {
                    cache.insert(output_id, (state, wire));
                    true
                }
            }
        };

        if matches!(mode, HalMode::Simulation | HalMode::Both) {
            self.emit_led(output_id, state, color);
        }

        if !fresh {
            debug!(output_id, ?state, "output unchanged, hardware write skipped");
            return;
        }

        if matches!(mode, HalMode::Hardware | HalMode::Both) {
            let hardware_id = remap::to_hardware_id(output_id);
            self.write_serial(format!("O{hardware_id:02}{wire}"));
        }
    }

    fn emit_led(&self, output_id: u8, state: OutputState, color: ColorCode) {
        let code = match state {
            OutputState::Off => ColorCode::Off,
            OutputState::On => color,
        };
        // No subscribers is normal when running headless.
        let _ = self.events.send(GameEvent::LedControl {
            element_id: output_id,
            color_code: code.as_char().to_string(),
            color_value: colors::color_hex(output_id, code).to_string(),
            timestamp: Utc::now(),
        });
    }

    fn write_serial(&self, command: String) {
        let link = self.link.lock().expect("link lock poisoned").clone();
        match link {
            Some(link) => link.send_write(command),
            None => warn!(%command, "no serial link attached, hardware write dropped"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
