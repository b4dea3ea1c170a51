//! Level content: [`LevelDef`], [`ArcadeMode`] and the authored
//! [`RoundTable`].
//!
//! Level definitions are data, not architecture: the engine only knows the
//! generic activators named by [`ArcadeMode`], and everything else (target
//! sets, scoring constants, animation periods) rides along in the
//! definition. Definitions are serde-friendly so alternative tables can be
//! loaded for testing.

use serde::{Deserialize, Serialize};
use strike_types::ColorCode;

// ────────────────────────────────────────────────────────────────────────────
// Arcade modes
// ────────────────────────────────────────────────────────────────────────────

/// The fixed set of pattern activators. A level's mode selects which
/// activator owns the target layout, its rendering, and its animation
/// timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArcadeMode {
    /// Static green + blue targets, everything valid.
    GreenBlueCombo,
    /// Static green targets, solid red traps.
    GreenAvoidRed,
    /// Static blue targets, solid red traps.
    BlueAvoidRed,
    /// One green target hops to a random position on a fixed interval;
    /// every other circle is a trap.
    RotatingGreen,
    /// One green and one blue target rotate; the rest are traps.
    RotatingGreenBlue,
    /// One blue target rotates; the rest are traps.
    RotatingBlue,
    /// Hit the same green target N times to score.
    MultiHitGreen,
    /// Hit the same blue target N times to score.
    MultiHitBlue,
    /// Green targets blink on a duty cycle; hits only count while lit.
    /// Bonus section active.
    BlinkingGreenBonus,
    /// Blue variant of the blinking mode.
    BlinkingBlueBonus,
    /// A traveling group of green targets follows a pre-authored position
    /// list; stragglers turn red.
    SnakeGreen,
    /// Blue variant of the snake mode.
    SnakeBlue,
    /// Memorize a displayed sequence, then reproduce it in order.
    MemorySequence,
    /// Anything the table names that this engine does not know. Logged and
    /// ignored; the level simply has no active targets.
    #[serde(other)]
    Unknown,
}

impl ArcadeMode {
    /// Modes that own their animation timers and must never be re-rolled by
    /// the generic refresh timer.
    pub fn manages_own_timing(self) -> bool {
        matches!(
            self,
            ArcadeMode::RotatingGreen
                | ArcadeMode::RotatingGreenBlue
                | ArcadeMode::RotatingBlue
                | ArcadeMode::BlinkingGreenBonus
                | ArcadeMode::BlinkingBlueBonus
                | ArcadeMode::SnakeGreen
                | ArcadeMode::SnakeBlue
                | ArcadeMode::MemorySequence
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Multiplier tiers
// ────────────────────────────────────────────────────────────────────────────

/// Tiered score multiplier earned by consecutive valid hits. Any trap hit
/// cancels the active multiplier and resets the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiplierConfig {
    /// Consecutive valid hits required for ×2.
    pub x2_after: u32,
    /// How long ×2 stays active, in seconds.
    pub x2_duration_s: u64,
    /// Consecutive valid hits required to escalate to ×3.
    pub x3_after: u32,
    pub x3_duration_s: u64,
}

impl Default for MultiplierConfig {
    fn default() -> Self {
        Self {
            x2_after: 4,
            x2_duration_s: 10,
            x3_after: 8,
            x3_duration_s: 10,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Level definition
// ────────────────────────────────────────────────────────────────────────────

/// One level of the round table: mission text, timing, target sets and
/// scoring constants. Fields irrelevant to a level's mode stay at their
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LevelDef {
    pub round: u32,
    pub level: u32,
    pub mission: String,
    pub duration_s: u32,
    pub goal_score: i64,
    pub arcade_mode: ArcadeMode,
    pub green_targets: Vec<u8>,
    pub blue_targets: Vec<u8>,
    pub red_traps: Vec<u8>,
    pub bonus_targets: Vec<u8>,
    /// Pool the memory sequence draws from.
    pub sequence_targets: Vec<u8>,
    pub sequence_length: usize,
    /// Display color of the memory sequence; per-element default when
    /// absent (green for 1–4, blue for 5–8).
    pub sequence_color: Option<ColorCode>,
    /// Pre-authored snake positions, cycled in order.
    pub snake_pattern: Vec<Vec<u8>>,
    /// Hits on the same target required in the multi-hit modes.
    pub required_hits: u32,
    pub rotation_delay_ms: u64,
    pub points_per_green: i64,
    pub points_per_blue: i64,
    pub points_per_bonus: i64,
    /// Award for completing a multi-hit target.
    pub points_per_completion: i64,
    /// Award for reproducing a full memory sequence.
    pub points_for_complete: i64,
    /// Negative. Applied on any trap hit.
    pub penalty_red: i64,
    pub multiplier: Option<MultiplierConfig>,
}

impl Default for LevelDef {
    fn default() -> Self {
        Self {
            round: 1,
            level: 1,
            mission: String::new(),
            duration_s: 30,
            goal_score: 0,
            arcade_mode: ArcadeMode::Unknown,
            green_targets: Vec::new(),
            blue_targets: Vec::new(),
            red_traps: Vec::new(),
            bonus_targets: Vec::new(),
            sequence_targets: Vec::new(),
            sequence_length: 0,
            sequence_color: None,
            snake_pattern: Vec::new(),
            required_hits: 0,
            rotation_delay_ms: 2000,
            points_per_green: 0,
            points_per_blue: 0,
            points_per_bonus: 0,
            points_per_completion: 0,
            points_for_complete: 0,
            penalty_red: -100,
            multiplier: None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Round table
// ────────────────────────────────────────────────────────────────────────────

/// Static ordered sequence of level definitions. Immutable at runtime
/// except for the test-only replacement hook on the engine.
#[derive(Debug, Clone)]
pub struct RoundTable {
    levels: Vec<LevelDef>,
}

impl RoundTable {
    pub fn new(levels: Vec<LevelDef>) -> Self {
        Self { levels }
    }

    /// The shipped content table: 2 rounds of 10 levels.
    pub fn builtin() -> Self {
        Self::new(builtin_levels())
    }

    pub fn get(&self, index: usize) -> Option<&LevelDef> {
        self.levels.get(index)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Sum of all level durations, in seconds.
    pub fn total_duration_s(&self) -> u32 {
        self.levels.iter().map(|l| l.duration_s).sum()
    }
}

fn builtin_levels() -> Vec<LevelDef> {
    let base = LevelDef::default;
    let bonus: Vec<u8> = vec![9, 10, 11, 12, 13];

    vec![
        // ── Round 1 ───────────────────────────────────────────────────────
        LevelDef {
            round: 1,
            level: 1,
            mission: "Touchez uniquement les verts et les bleus !".into(),
            goal_score: 1000,
            arcade_mode: ArcadeMode::GreenBlueCombo,
            green_targets: vec![1, 2, 3, 4],
            blue_targets: vec![5, 6, 7, 8],
            points_per_green: 60,
            points_per_blue: 80,
            multiplier: Some(MultiplierConfig::default()),
            ..base()
        },
        LevelDef {
            round: 1,
            level: 2,
            mission: "Touchez uniquement les verts. Évitez les rouges !".into(),
            goal_score: 1200,
            arcade_mode: ArcadeMode::GreenAvoidRed,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            points_per_green: 50,
            multiplier: Some(MultiplierConfig::default()),
            ..base()
        },
        LevelDef {
            round: 1,
            level: 3,
            mission: "Touchez uniquement les bleus !".into(),
            goal_score: 1400,
            arcade_mode: ArcadeMode::BlueAvoidRed,
            blue_targets: vec![5, 6, 7, 8],
            red_traps: vec![1, 2, 3, 4],
            points_per_blue: 90,
            multiplier: Some(MultiplierConfig::default()),
            ..base()
        },
        LevelDef {
            round: 1,
            level: 4,
            mission: "Touchez uniquement les verts !".into(),
            goal_score: 1600,
            arcade_mode: ArcadeMode::RotatingGreen,
            green_targets: vec![1, 2, 3, 4],
            points_per_green: 80,
            rotation_delay_ms: 2000,
            ..base()
        },
        LevelDef {
            round: 1,
            level: 5,
            mission: "Touchez uniquement les verts et les bleus !".into(),
            goal_score: 1800,
            arcade_mode: ArcadeMode::RotatingGreenBlue,
            green_targets: vec![1, 2, 3, 4],
            blue_targets: vec![5, 6, 7, 8],
            points_per_green: 90,
            points_per_blue: 100,
            rotation_delay_ms: 2000,
            ..base()
        },
        LevelDef {
            round: 1,
            level: 6,
            mission: "Touchez uniquement les Bleus !".into(),
            goal_score: 2000,
            arcade_mode: ArcadeMode::RotatingBlue,
            blue_targets: vec![5, 6, 7, 8],
            points_per_blue: 110,
            rotation_delay_ms: 2000,
            ..base()
        },
        LevelDef {
            round: 1,
            level: 7,
            mission: "Touchez 2 fois la même cible verte. Évitez les rouges !".into(),
            goal_score: 2200,
            arcade_mode: ArcadeMode::MultiHitGreen,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            required_hits: 2,
            points_per_completion: 120,
            ..base()
        },
        LevelDef {
            round: 1,
            level: 8,
            mission: "Touchez 2 fois la même cible bleue. Évitez les rouges !".into(),
            goal_score: 2400,
            arcade_mode: ArcadeMode::MultiHitBlue,
            blue_targets: vec![5, 6, 7, 8],
            red_traps: vec![1, 2, 3, 4],
            required_hits: 2,
            points_per_completion: 120,
            ..base()
        },
        LevelDef {
            round: 1,
            level: 9,
            mission: "Touchez 3 fois la même cible verte. Évitez les rouges !".into(),
            goal_score: 2600,
            arcade_mode: ArcadeMode::MultiHitGreen,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            required_hits: 3,
            points_per_completion: 130,
            ..base()
        },
        LevelDef {
            round: 1,
            level: 10,
            mission: "Touchez 3 fois la même cible bleue. Évitez les rouges !".into(),
            goal_score: 2800,
            arcade_mode: ArcadeMode::MultiHitBlue,
            blue_targets: vec![5, 6, 7, 8],
            red_traps: vec![1, 2, 3, 4],
            required_hits: 3,
            points_per_completion: 130,
            ..base()
        },
        // ── Round 2 ───────────────────────────────────────────────────────
        LevelDef {
            round: 2,
            level: 1,
            mission: "Touchez uniquement les verts. Évitez les rouges !".into(),
            goal_score: 3000,
            arcade_mode: ArcadeMode::BlinkingGreenBonus,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: bonus.clone(),
            points_per_green: 140,
            points_per_bonus: 50,
            multiplier: Some(MultiplierConfig::default()),
            ..base()
        },
        LevelDef {
            round: 2,
            level: 2,
            mission: "Touchez uniquement les bleus. Évitez les rouges !".into(),
            goal_score: 3100,
            arcade_mode: ArcadeMode::BlinkingBlueBonus,
            blue_targets: vec![5, 6, 7, 8],
            red_traps: vec![1, 2, 3, 4],
            bonus_targets: bonus.clone(),
            points_per_blue: 140,
            points_per_bonus: 50,
            multiplier: Some(MultiplierConfig::default()),
            ..base()
        },
        LevelDef {
            round: 2,
            level: 3,
            mission: "Touchez les cibles vertes. Évitez les rouges !".into(),
            goal_score: 3200,
            arcade_mode: ArcadeMode::SnakeGreen,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: bonus.clone(),
            snake_pattern: vec![vec![1, 2, 4], vec![2, 4, 3], vec![4, 3, 1], vec![3, 1, 2]],
            rotation_delay_ms: 3000,
            points_per_green: 150,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 4,
            mission: "Touchez les cibles bleus. Évitez les rouges !".into(),
            goal_score: 3400,
            arcade_mode: ArcadeMode::SnakeBlue,
            blue_targets: vec![5, 6, 7, 8],
            red_traps: vec![1, 2, 3, 4],
            bonus_targets: bonus.clone(),
            snake_pattern: vec![vec![5, 6, 8], vec![6, 8, 7], vec![8, 7, 5], vec![7, 5, 6]],
            rotation_delay_ms: 3000,
            points_per_blue: 160,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 5,
            mission: "Touchez les cibles vertes. Évitez les rouges !".into(),
            goal_score: 3600,
            arcade_mode: ArcadeMode::SnakeGreen,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: bonus.clone(),
            snake_pattern: vec![vec![1, 2], vec![2, 4], vec![4, 3], vec![3, 1]],
            rotation_delay_ms: 3000,
            points_per_green: 160,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 6,
            mission: "Touchez les cibles bleus. Évitez les rouges !".into(),
            goal_score: 3800,
            arcade_mode: ArcadeMode::SnakeBlue,
            blue_targets: vec![5, 6, 7, 8],
            red_traps: vec![1, 2, 3, 4],
            bonus_targets: bonus.clone(),
            snake_pattern: vec![vec![5, 6], vec![6, 8], vec![8, 7], vec![7, 5]],
            rotation_delay_ms: 3000,
            points_per_blue: 170,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 7,
            mission: "Reconstituez la séquence. Évitez les rouges !".into(),
            goal_score: 4000,
            arcade_mode: ArcadeMode::MemorySequence,
            sequence_targets: vec![1, 2, 3, 4],
            sequence_length: 4,
            sequence_color: Some(ColorCode::Green),
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: bonus.clone(),
            points_for_complete: 3900,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 8,
            mission: "Reconstituez la séquence. Évitez les rouges !".into(),
            goal_score: 4200,
            arcade_mode: ArcadeMode::MemorySequence,
            sequence_targets: vec![5, 6, 7, 8],
            sequence_length: 4,
            sequence_color: Some(ColorCode::Blue),
            red_traps: vec![1, 2, 3, 4],
            bonus_targets: bonus.clone(),
            points_for_complete: 4100,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 9,
            mission: "Reconstituez la séquence. Évitez les rouges !".into(),
            goal_score: 4400,
            arcade_mode: ArcadeMode::MemorySequence,
            sequence_targets: vec![1, 2, 3, 4, 5, 6, 7, 8],
            sequence_length: 6,
            bonus_targets: bonus.clone(),
            points_for_complete: 4300,
            points_per_bonus: 50,
            ..base()
        },
        LevelDef {
            round: 2,
            level: 10,
            mission: "Reconstituez la séquence. Évitez les rouges !".into(),
            goal_score: 4600,
            arcade_mode: ArcadeMode::MemorySequence,
            sequence_targets: vec![1, 2, 3, 4, 5, 6, 7, 8],
            sequence_length: 7,
            bonus_targets: bonus,
            points_for_complete: 4400,
            points_per_bonus: 50,
            ..base()
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_table_has_two_rounds_of_ten() {
        let table = RoundTable::builtin();
        assert_eq!(table.len(), 20);
        assert_eq!(table.get(0).unwrap().round, 1);
        assert_eq!(table.get(10).unwrap().round, 2);
        assert!(table.get(20).is_none());
    }

    #[test]
    fn goal_scores_increase_within_a_round() {
        let table = RoundTable::builtin();
        for window in (0..10).collect::<Vec<_>>().windows(2) {
            let a = table.get(window[0]).unwrap().goal_score;
            let b = table.get(window[1]).unwrap().goal_score;
            assert!(b > a, "goal must rise from level {} to {}", window[0], window[1]);
        }
    }

    #[test]
    fn total_duration_is_ten_minutes() {
        // 20 levels × 30 s.
        assert_eq!(RoundTable::builtin().total_duration_s(), 600);
    }

    #[test]
    fn unknown_mode_name_deserializes_to_unknown() {
        let level: LevelDef =
            serde_json::from_str(r#"{"arcadeMode":"two-step-ultimate","goalScore":100}"#).unwrap();
        assert_eq!(level.arcade_mode, ArcadeMode::Unknown);
        assert_eq!(level.goal_score, 100);
        // Defaults fill the rest.
        assert_eq!(level.duration_s, 30);
        assert_eq!(level.penalty_red, -100);
    }

    #[test]
    fn mode_names_round_trip_in_kebab_case() {
        let json = serde_json::to_string(&ArcadeMode::BlinkingGreenBonus).unwrap();
        assert_eq!(json, r#""blinking-green-bonus""#);
        let back: ArcadeMode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ArcadeMode::BlinkingGreenBonus);
    }

    #[test]
    fn self_animating_modes_are_exempt_from_refresh() {
        assert!(ArcadeMode::RotatingGreen.manages_own_timing());
        assert!(ArcadeMode::SnakeBlue.manages_own_timing());
        assert!(ArcadeMode::MemorySequence.manages_own_timing());
        assert!(!ArcadeMode::GreenBlueCombo.manages_own_timing());
        assert!(!ArcadeMode::MultiHitGreen.manages_own_timing());
    }
}
