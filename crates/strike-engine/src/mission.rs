//! [`ActiveMission`] – the live play-state of the installed level.
//!
//! Created at level start, mutated by every input event and animation
//! timer, destroyed when the level ends. Teardown-before-create is the
//! load-bearing invariant here: the engine bumps its generation counter and
//! drops the old mission (aborting all of its timer tasks) *before*
//! installing a new one, and every timer message carries the generation it
//! was armed under, so a stale timer can never fire into a new mission.

use std::collections::HashMap;

use strike_types::ColorCode;
use tokio::task::JoinHandle;

use crate::rounds::LevelDef;

/// One addressable cell of the current layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveTarget {
    pub element_id: u8,
    pub color: ColorCode,
    /// Hitting this target applies the level's penalty.
    pub is_trap: bool,
    /// Hitting this target can score.
    pub is_valid: bool,
    /// For rotating/snake layouts: the cell currently worth points.
    pub is_active: bool,
    /// Neutral-scoring bonus cell (central section).
    pub is_bonus: bool,
}

impl ActiveTarget {
    pub fn valid(element_id: u8, color: ColorCode) -> Self {
        Self {
            element_id,
            color,
            is_trap: false,
            is_valid: true,
            is_active: false,
            is_bonus: false,
        }
    }

    pub fn active(element_id: u8, color: ColorCode) -> Self {
        Self {
            is_active: true,
            ..Self::valid(element_id, color)
        }
    }

    pub fn trap(element_id: u8) -> Self {
        Self {
            element_id,
            color: ColorCode::Red,
            is_trap: true,
            is_valid: false,
            is_active: true,
            is_bonus: false,
        }
    }

    pub fn bonus(element_id: u8) -> Self {
        Self {
            is_bonus: true,
            ..Self::valid(element_id, ColorCode::Yellow)
        }
    }
}

/// The currently loaded level plus its live state. Exclusively owned by the
/// engine; timers communicate with it only through generation-tagged
/// messages.
pub struct ActiveMission {
    pub def: LevelDef,
    /// Generation this mission was installed under.
    pub generation: u64,
    pub targets: Vec<ActiveTarget>,
    /// Valid-hit streak feeding the multiplier tiers.
    pub consecutive_valid_hits: u32,
    pub multiplier: u32,
    pub multiplier_active: bool,
    /// Per-target hit counters for the multi-hit modes.
    pub multi_hit: HashMap<u8, u32>,
    /// Shared duty-cycle phase of all blinking targets.
    pub blink_lit: bool,
    pub blink_targets: Vec<u8>,
    pub blink_color: ColorCode,
    /// Next snake_pattern entry to render.
    pub snake_index: usize,
    pub memory_sequence: Vec<u8>,
    /// Reproduction progress into `memory_sequence`.
    pub memory_index: usize,
    /// Display phase finished; reproduction phase running.
    pub memory_displayed: bool,
    /// Animation/timer tasks owned by this mission. Aborted on drop.
    pub tasks: Vec<JoinHandle<()>>,
    pub multiplier_task: Option<JoinHandle<()>>,
}

impl ActiveMission {
    pub fn new(def: LevelDef, generation: u64) -> Self {
        Self {
            def,
            generation,
            targets: Vec::new(),
            consecutive_valid_hits: 0,
            multiplier: 1,
            multiplier_active: false,
            multi_hit: HashMap::new(),
            blink_lit: false,
            blink_targets: Vec::new(),
            blink_color: ColorCode::Off,
            snake_index: 0,
            memory_sequence: Vec::new(),
            memory_index: 0,
            memory_displayed: false,
            tasks: Vec::new(),
            multiplier_task: None,
        }
    }

    pub fn find_target(&self, element_id: u8) -> Option<ActiveTarget> {
        self.targets
            .iter()
            .find(|t| t.element_id == element_id)
            .copied()
    }
}

impl Drop for ActiveMission {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(task) = self.multiplier_task.take() {
            task.abort();
        }
    }
}
