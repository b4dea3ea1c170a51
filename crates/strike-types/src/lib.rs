//! `strike-types` – shared vocabulary for the StrikeLoop installation.
//!
//! Everything that crosses a crate boundary lives here: the broadcast event
//! vocabulary consumed by the staff console and the passive displays, the
//! control commands flowing the other way, the color/output code alphabet of
//! the serial protocol, and the global [`StrikeError`] taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Element id layout
// ────────────────────────────────────────────────────────────────────────────

/// Physical layout of the target array, by logical element id.
pub mod ids {
    use std::ops::RangeInclusive;

    /// Large illuminated touch targets arranged in the outer ring.
    pub const OUTER_CIRCLES: RangeInclusive<u8> = 1..=8;
    /// The central circle; its output drives the ring around the small holes.
    pub const CENTRAL_CIRCLE: u8 = 9;
    /// Small holes inside the central ring. Input only, no LED control.
    pub const INNER_HOLES: RangeInclusive<u8> = 10..=13;
    /// Back-lit control buttons on the validation panel.
    pub const CONTROL_BUTTONS: RangeInclusive<u8> = 14..=22;
    /// Highest addressable output id.
    pub const MAX_OUTPUT: u8 = 22;
}

// ────────────────────────────────────────────────────────────────────────────
// Colors and output state
// ────────────────────────────────────────────────────────────────────────────

/// One-character color/state alphabet of the controller protocol.
///
/// Parsing is case-insensitive and only the first character of a longer
/// color name is significant, so `"Green"`, `"g"` and `"G"` are equivalent.
/// `'o'` and `'0'` both mean off; `'1'` requests the element-specific color
/// of a control button; `'d'` is the on-state white of the current protocol
/// (`'w'` doubles as the wire encoding of "off").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorCode {
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    Cyan,
    White,
    /// Colorless off state.
    Off,
    /// Resolve to the element's own fixed color (control buttons).
    Element,
}

impl ColorCode {
    /// Parse a color code from user/config input. Unknown characters fall
    /// back to [`ColorCode::White`], mirroring the controller's behavior of
    /// treating anything unrecognised as a plain white command.
    pub fn from_char(c: char) -> Self {
        match c.to_ascii_lowercase() {
            'r' => ColorCode::Red,
            'g' => ColorCode::Green,
            'b' => ColorCode::Blue,
            'y' => ColorCode::Yellow,
            'p' => ColorCode::Purple,
            'c' => ColorCode::Cyan,
            'w' | 'd' => ColorCode::White,
            'o' | '0' => ColorCode::Off,
            '1' => ColorCode::Element,
            _ => ColorCode::White,
        }
    }

    /// Parse from a string; only the first character is significant.
    pub fn parse(s: &str) -> Self {
        s.chars().next().map(Self::from_char).unwrap_or(ColorCode::Off)
    }

    /// The canonical single-character form used in events and logs.
    pub fn as_char(self) -> char {
        match self {
            ColorCode::Red => 'r',
            ColorCode::Green => 'g',
            ColorCode::Blue => 'b',
            ColorCode::Yellow => 'y',
            ColorCode::Purple => 'p',
            ColorCode::Cyan => 'c',
            ColorCode::White => 'd',
            ColorCode::Off => 'o',
            ColorCode::Element => '1',
        }
    }

    /// The character sent on the serial wire. Off is transmitted as `'w'`
    /// (the controller ignores color for off commands) and the on-state
    /// white is `'d'` in the current protocol.
    pub fn wire_char(self) -> char {
        match self {
            ColorCode::Off => 'w',
            other => other.as_char(),
        }
    }

    pub fn is_off(self) -> bool {
        self == ColorCode::Off
    }
}

impl std::fmt::Display for ColorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Binary output state of a target LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputState {
    Off,
    On,
}

/// Execution mode of the hardware abstraction layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HalMode {
    /// Emit simulation events only; never touch the serial line.
    #[default]
    Simulation,
    /// Drive the serial line only.
    Hardware,
    /// Drive both, independently.
    Both,
}

impl std::str::FromStr for HalMode {
    type Err = StrikeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulation" => Ok(HalMode::Simulation),
            "hardware" => Ok(HalMode::Hardware),
            "both" => Ok(HalMode::Both),
            other => Err(StrikeError::Config(format!(
                "invalid hardware mode `{other}` (expected simulation, hardware or both)"
            ))),
        }
    }
}

impl std::fmt::Display for HalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HalMode::Simulation => write!(f, "simulation"),
            HalMode::Hardware => write!(f, "hardware"),
            HalMode::Both => write!(f, "both"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Player-facing game state
// ────────────────────────────────────────────────────────────────────────────

/// Snapshot of the player-facing game state. Owned exclusively by the game
/// engine and broadcast (never shared) to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub round: u32,
    pub level: u32,
    pub score: i64,
    pub mission_number: u32,
    pub multiplier: String,
    pub mission_description: String,
}

impl Default for GameState {
    fn default() -> Self {
        Self {
            round: 1,
            level: 1,
            score: 0,
            mission_number: 1,
            multiplier: "x1".to_string(),
            mission_description: "Waiting for mission...".to_string(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Broadcast events (engine/HAL → clients)
// ────────────────────────────────────────────────────────────────────────────

/// Events emitted to the staff console and the passive displays.
///
/// Serialized as externally tagged JSON with a camelCase `type` field so the
/// payload on the WebSocket matches what the front-end clients expect, e.g.
/// `{"type":"scoreUpdate","score":1200}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameEvent {
    GameStarted,
    GameFinished,
    #[serde(rename_all = "camelCase")]
    RoundUpdate {
        round: u32,
        level: u32,
        duration: u32,
        goal_score: i64,
    },
    MissionUpdate {
        number: u32,
        description: String,
    },
    ScoreUpdate {
        score: i64,
    },
    MultiplierUpdate {
        multiplier: String,
    },
    #[serde(rename_all = "camelCase")]
    TimeUpdate {
        time_left: u32,
        time_string: String,
    },
    #[serde(rename_all = "camelCase")]
    LedControl {
        element_id: u8,
        color_code: String,
        color_value: String,
        timestamp: DateTime<Utc>,
    },
    BarLed {
        percentage: u8,
    },
    BonusActive {
        active: bool,
    },
    TeamName {
        name: String,
    },
    Reset,
}

// ────────────────────────────────────────────────────────────────────────────
// Control events (clients/hardware → engine)
// ────────────────────────────────────────────────────────────────────────────

/// Commands consumed by the game engine: staff console actions and decoded
/// hardware input events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlEvent {
    #[serde(rename_all = "camelCase")]
    Start {
        team_name: String,
    },
    #[serde(rename_all = "camelCase")]
    CircleClick {
        circle_id: u8,
    },
    HardReset,
    InputEvent {
        code: String,
        value: u16,
    },
}

/// A decoded hardware input frame: the group code (leading zero stripped)
/// and the 16-bit bitmask value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    pub code: String,
    pub value: u16,
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning serial faults, protocol timeouts and
/// configuration problems.
#[derive(Error, Debug)]
pub enum StrikeError {
    /// No serial device is open. Fatal to the write attempt, never to the
    /// process.
    #[error("serial port unavailable: {0}")]
    PortUnavailable(String),

    /// A read command received no response frame within the timeout.
    #[error("no response from controller within {0} ms")]
    NoResponse(u64),

    /// The controller acknowledged an output command with a non-success
    /// status byte.
    #[error("controller rejected command (status `{status}`)")]
    CommandFailed { status: char },

    /// An input id the engine does not recognise. Logged and ignored.
    #[error("unknown input id `{0}`")]
    UnknownInput(String),

    /// An arcade mode name the engine does not recognise. Logged and ignored.
    #[error("unknown arcade mode `{0}`")]
    UnknownMode(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_code_first_char_significant_and_case_insensitive() {
        assert_eq!(ColorCode::parse("Green"), ColorCode::Green);
        assert_eq!(ColorCode::parse("g"), ColorCode::Green);
        assert_eq!(ColorCode::parse("R"), ColorCode::Red);
        assert_eq!(ColorCode::parse("0"), ColorCode::Off);
        assert_eq!(ColorCode::parse("o"), ColorCode::Off);
        assert_eq!(ColorCode::parse("1"), ColorCode::Element);
    }

    #[test]
    fn off_is_transmitted_as_w_on_the_wire() {
        assert_eq!(ColorCode::Off.wire_char(), 'w');
        assert_eq!(ColorCode::White.wire_char(), 'd');
        assert_eq!(ColorCode::Green.wire_char(), 'g');
    }

    #[test]
    fn game_event_json_uses_camel_case_type_tag() {
        let event = GameEvent::ScoreUpdate { score: 1200 };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"scoreUpdate","score":1200}"#);

        let event = GameEvent::RoundUpdate {
            round: 1,
            level: 2,
            duration: 30,
            goal_score: 1200,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"roundUpdate""#));
        assert!(json.contains(r#""goalScore":1200"#));
    }

    #[test]
    fn control_event_round_trip() {
        let raw = r#"{"type":"start","teamName":"Les Rouges"}"#;
        let event: ControlEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ControlEvent::Start {
                team_name: "Les Rouges".to_string()
            }
        );

        let raw = r#"{"type":"circleClick","circleId":5}"#;
        let event: ControlEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, ControlEvent::CircleClick { circle_id: 5 });

        let raw = r#"{"type":"hardReset"}"#;
        let event: ControlEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event, ControlEvent::HardReset);
    }

    #[test]
    fn led_control_event_round_trip() {
        let event = GameEvent::LedControl {
            element_id: 7,
            color_code: "g".to_string(),
            color_value: "#27ae60".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"ledControl""#));
        assert!(json.contains(r#""elementId":7"#));
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn hal_mode_parses_known_values_only() {
        assert_eq!("hardware".parse::<HalMode>().unwrap(), HalMode::Hardware);
        assert_eq!("BOTH".parse::<HalMode>().unwrap(), HalMode::Both);
        assert!("neither".parse::<HalMode>().is_err());
    }

    #[test]
    fn strike_error_display() {
        let err = StrikeError::NoResponse(2000);
        assert!(err.to_string().contains("2000 ms"));

        let err = StrikeError::CommandFailed { status: '0' };
        assert!(err.to_string().contains("status `0`"));

        let err = StrikeError::UnknownMode("laser-tag".to_string());
        assert!(err.to_string().contains("laser-tag"));
    }
}
