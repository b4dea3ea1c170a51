//! [`GameEngine`] – round/level progression, target validation and scoring.
//!
//! The engine is a single-owner state machine driven by two channels: the
//! control lane of the [`EventBus`] (staff commands, decoded hardware
//! inputs) and an internal message queue fed by its own timer tasks. Every
//! timer message carries the mission generation it was armed under;
//! messages from a torn-down mission are discarded, which is what makes
//! teardown-before-create safe without any locking.
//!
//! Scoring rules enforced here:
//!
//! - the per-level score floors at 0, penalties never drive it negative;
//! - reaching the goal score latches: a later penalty cannot revoke level
//!   completion at the next timer tick;
//! - consecutive valid hits feed tiered multipliers (×2, then ×3) that a
//!   single trap hit cancels.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use strike_broadcast::EventBus;
use strike_hal::Hal;
use strike_types::{ids, ColorCode, ControlEvent, GameEvent, GameState, StrikeError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mission::{ActiveMission, ActiveTarget};
use crate::rounds::{ArcadeMode, LevelDef, RoundTable};

/// Blink duty cycle of the blinking modes: 1 s lit, 1 s dark.
const BLINK_INTERVAL: Duration = Duration::from_millis(1000);
/// Memory-sequence display cadence: each element 1 s lit, 1 s dark.
const MEMORY_STEP: Duration = Duration::from_secs(1);

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard ceiling on total session length; expiry forces a hard reset.
    pub session_minutes: u64,
    /// Bounds of the randomized generic refresh period.
    pub refresh_min_ms: u64,
    pub refresh_max_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_minutes: 15,
            refresh_min_ms: 3000,
            refresh_max_ms: 5000,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Timer messages
// ────────────────────────────────────────────────────────────────────────────

/// Messages the engine's own timer tasks post back to it. All
/// mission-scoped variants carry the generation they were armed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMsg {
    SecondTick { generation: u64 },
    /// Rotation and snake advance.
    Rotate { generation: u64 },
    BlinkToggle { generation: u64 },
    /// Generic pattern refresh for non-self-animating modes.
    Refresh { generation: u64 },
    /// One step of the memory-sequence display phase.
    MemoryStep { generation: u64, step: usize },
    MultiplierExpired { generation: u64 },
    SessionExpired { generation: u64 },
}

/// Outcome of a mode validator for a non-trap hit.
enum HitOutcome {
    Ignored,
    Valid { points: i64 },
    Penalty { points: i64 },
}

/// `mm:ss` rendering of a remaining-time value.
pub fn format_time(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

// ────────────────────────────────────────────────────────────────────────────
// GameEngine
// ────────────────────────────────────────────────────────────────────────────

/// The mission state machine. Owns the game state, the current
/// [`ActiveMission`] and the session timer; consumes control events and its
/// own timer messages; renders through the [`Hal`] and broadcasts through
/// the [`EventBus`].
pub struct GameEngine {
    hal: Arc<Hal>,
    bus: Arc<EventBus>,
    rounds: RoundTable,
    config: EngineConfig,
    state: GameState,
    running: bool,
    level_index: usize,
    local_score: i64,
    goal_achieved: bool,
    time_left: u32,
    /// Bumped on every mission teardown; stale timer messages are dropped.
    generation: u64,
    session_generation: u64,
    mission: Option<ActiveMission>,
    session_task: Option<JoinHandle<()>>,
    rng: StdRng,
    msg_tx: mpsc::UnboundedSender<EngineMsg>,
    msg_rx: Option<mpsc::UnboundedReceiver<EngineMsg>>,
}

impl GameEngine {
    pub fn new(hal: Arc<Hal>, bus: Arc<EventBus>, rounds: RoundTable, config: EngineConfig) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        Self {
            hal,
            bus,
            rounds,
            config,
            state: GameState::default(),
            running: false,
            level_index: 0,
            local_score: 0,
            goal_achieved: false,
            time_left: 0,
            generation: 0,
            session_generation: 0,
            mission: None,
            session_task: None,
            rng: StdRng::from_os_rng(),
            msg_tx,
            msg_rx: Some(msg_rx),
        }
    }

    /// Seed the engine's RNG, making pattern rolls deterministic.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    // ── Introspection ──────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn score(&self) -> i64 {
        self.local_score
    }

    pub fn goal_achieved(&self) -> bool {
        self.goal_achieved
    }

    pub fn level_index(&self) -> usize {
        self.level_index
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn current_mission(&self) -> Option<&ActiveMission> {
        self.mission.as_ref()
    }

    /// Replace the round table. Refused while a game is running; intended
    /// for tests and content tooling only.
    pub fn set_rounds(&mut self, rounds: RoundTable) -> Result<(), StrikeError> {
        if self.running {
            return Err(StrikeError::Config(
                "cannot change rounds while a game is running".to_string(),
            ));
        }
        info!(levels = rounds.len(), "round table replaced");
        self.rounds = rounds;
        Ok(())
    }

    // ── Main loop ──────────────────────────────────────────────────────────

    /// Drive the engine from the bus and its own timers until the control
    /// lane closes.
    pub async fn run(mut self) {
        let mut control = self.bus.subscribe_control();
        let mut msgs = match self.msg_rx.take() {
            Some(rx) => rx,
            None => {
                warn!("engine run() called twice");
                return;
            }
        };
        info!(
            levels = self.rounds.len(),
            total_duration_s = self.rounds.total_duration_s(),
            "game engine ready"
        );

        loop {
            tokio::select! {
                result = control.recv() => match result {
                    Ok(event) => self.handle_control(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "control lane lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(msg) = msgs.recv() => self.handle_msg(msg),
            }
        }
    }

    /// Dispatch one control event.
    pub fn handle_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Start { team_name } => self.start_game(&team_name),
            ControlEvent::HardReset => self.hard_reset(),
            ControlEvent::CircleClick { circle_id } => {
                self.process_game_input(circle_id, "simulator");
            }
            ControlEvent::InputEvent { code, value } => match code.parse::<u8>() {
                Ok(id) => {
                    debug!(code = %code, value, "hardware input");
                    self.process_game_input(id, "hardware");
                }
                Err(_) => {
                    warn!(error = %StrikeError::UnknownInput(code), value, "hardware input ignored");
                }
            },
        }
    }

    /// Dispatch one timer message, discarding anything from a torn-down
    /// generation.
    pub fn handle_msg(&mut self, msg: EngineMsg) {
        let current = self.generation;
        match msg {
            EngineMsg::SecondTick { generation } if generation == current => self.tick_second(),
            EngineMsg::Rotate { generation } if generation == current => self.handle_rotate(),
            EngineMsg::BlinkToggle { generation } if generation == current => self.handle_blink(),
            EngineMsg::Refresh { generation } if generation == current => self.refresh_layout(),
            EngineMsg::MemoryStep { generation, step } if generation == current => {
                self.handle_memory_step(step);
            }
            EngineMsg::MultiplierExpired { generation } if generation == current => {
                self.expire_multiplier();
            }
            EngineMsg::SessionExpired { generation } => {
                if generation == self.session_generation {
                    warn!("session time ceiling reached, forcing hard reset");
                    self.hard_reset();
                }
            }
            stale => debug!(?stale, "stale timer message discarded"),
        }
    }

    // ── Game lifecycle ─────────────────────────────────────────────────────

    pub fn start_game(&mut self, team_name: &str) {
        if self.running {
            debug!("start ignored, game already running");
            return;
        }
        info!(team_name, "game start");
        self.running = true;
        self.level_index = 0;
        self.local_score = 0;
        self.goal_achieved = false;
        self.state = GameState::default();
        self.state.mission_description = "Game starting... Prepare for first round!".to_string();

        self.start_session_timer();
        self.emit(GameEvent::GameStarted);
        self.start_level(false);
    }

    pub fn hard_reset(&mut self) {
        info!("hard reset, returning to idle");
        self.running = false;
        self.teardown_mission();
        self.stop_session_timer();
        self.level_index = 0;
        self.local_score = 0;
        self.goal_achieved = false;
        self.time_left = 0;
        self.state = GameState::default();
        self.clear_leds();
        self.emit(GameEvent::Reset);
    }

    fn finish_game(&mut self) {
        info!(final_score = self.local_score, "all levels completed, game finished");
        self.running = false;
        self.teardown_mission();
        self.stop_session_timer();
        self.clear_leds();
        self.emit(GameEvent::GameFinished);
    }

    fn start_level(&mut self, is_retry: bool) {
        let Some(def) = self.rounds.get(self.level_index).cloned() else {
            self.finish_game();
            return;
        };

        self.time_left = def.duration_s;
        if !is_retry {
            self.local_score = 0;
            self.goal_achieved = false;
        }
        info!(
            round = def.round,
            level = def.level,
            retry = is_retry,
            mission = %def.mission,
            duration_s = def.duration_s,
            goal_score = def.goal_score,
            "starting level"
        );

        self.state.round = def.round;
        self.state.level = def.level;
        self.state.mission_number = def.level;
        self.state.mission_description = def.mission.clone();
        self.state.score = self.local_score;
        self.state.multiplier = "x1".to_string();

        // Strict teardown-before-create: the previous mission's timers are
        // gone before the new mission exists.
        self.teardown_mission();
        let mut mission = ActiveMission::new(def.clone(), self.generation);

        self.emit(GameEvent::BonusActive { active: false });
        if !is_retry {
            self.clear_leds();
        }
        self.activate_mode(&mut mission);

        self.spawn_interval(&mut mission, Duration::from_secs(1), |generation| {
            EngineMsg::SecondTick { generation }
        });
        if !def.arcade_mode.manages_own_timing() {
            let period = Duration::from_millis(
                self.rng
                    .random_range(self.config.refresh_min_ms..=self.config.refresh_max_ms),
            );
            debug!(period_ms = period.as_millis() as u64, "LED refresh armed");
            self.spawn_interval(&mut mission, period, |generation| EngineMsg::Refresh {
                generation,
            });
        }
        self.mission = Some(mission);

        self.emit(GameEvent::RoundUpdate {
            round: def.round,
            level: def.level,
            duration: def.duration_s,
            goal_score: def.goal_score,
        });
        self.emit(GameEvent::MissionUpdate {
            number: def.level,
            description: def.mission.clone(),
        });
        self.emit(GameEvent::TimeUpdate {
            time_left: self.time_left,
            time_string: format_time(self.time_left),
        });
        self.emit(GameEvent::ScoreUpdate {
            score: self.local_score,
        });
        self.emit(GameEvent::MultiplierUpdate {
            multiplier: "x1".to_string(),
        });
    }

    fn tick_second(&mut self) {
        if !self.running {
            return;
        }
        if self.time_left > 0 {
            self.time_left -= 1;
            let time_string = format_time(self.time_left);
            self.emit(GameEvent::TimeUpdate {
                time_left: self.time_left,
                time_string: time_string.clone(),
            });
            if self.time_left % 10 == 0 {
                info!(time_left = %time_string, "level time remaining");
            }
        } else {
            self.resolve_level();
        }
    }

    fn resolve_level(&mut self) {
        let Some(def) = self.rounds.get(self.level_index) else {
            self.finish_game();
            return;
        };
        if self.goal_achieved {
            info!(
                level = def.level,
                score = self.local_score,
                goal_score = def.goal_score,
                "level completed"
            );
            self.level_index += 1;
            if self.level_index < self.rounds.len() {
                self.start_level(false);
            } else {
                self.finish_game();
            }
        } else {
            info!(
                score = self.local_score,
                goal_score = def.goal_score,
                "time expired, goal not achieved, retrying level"
            );
            self.start_level(true);
        }
    }

    fn teardown_mission(&mut self) {
        self.generation += 1;
        // Dropping the mission aborts every timer task it owns.
        self.mission = None;
    }

    fn start_session_timer(&mut self) {
        self.stop_session_timer();
        self.session_generation += 1;
        let generation = self.session_generation;
        let tx = self.msg_tx.clone();
        let limit = Duration::from_secs(self.config.session_minutes * 60);
        info!(minutes = self.config.session_minutes, "session timer started");
        self.session_task = Some(tokio::spawn(async move {
            tokio::time::sleep(limit).await;
            let _ = tx.send(EngineMsg::SessionExpired { generation });
        }));
    }

    fn stop_session_timer(&mut self) {
        if let Some(task) = self.session_task.take() {
            task.abort();
        }
    }

    // ── Input validation & scoring ─────────────────────────────────────────

    /// Validate one input event (physical hit or simulator click) against
    /// the active targets. Unknown ids are logged no-ops: the target may
    /// have just rotated away.
    pub fn process_game_input(&mut self, input_id: u8, source: &str) {
        if !self.running {
            debug!(input_id, source, "input received but no game running");
            return;
        }
        let Some(mut mission) = self.mission.take() else {
            return;
        };
        self.input_into_mission(&mut mission, input_id, source);
        self.mission = Some(mission);
    }

    fn input_into_mission(&mut self, mission: &mut ActiveMission, input_id: u8, source: &str) {
        if mission.targets.is_empty() {
            debug!(input_id, "no active targets");
            return;
        }
        let Some(target) = mission.find_target(input_id) else {
            debug!(input_id, source, "input not found in active targets");
            return;
        };
        debug!(input_id, color = %target.color, source, "input detected");
        let goal_score = mission.def.goal_score;

        if target.is_trap {
            let penalty = mission.def.penalty_red;
            info!(input_id, penalty, "trap hit");
            self.cancel_multiplier(mission);
            self.update_score(self.local_score + penalty, goal_score);
            return;
        }

        match self.validate_mode_hit(mission, &target) {
            HitOutcome::Ignored => {}
            HitOutcome::Penalty { points } => {
                self.update_score(self.local_score + points, goal_score);
            }
            HitOutcome::Valid { mut points } => {
                mission.consecutive_valid_hits += 1;
                self.maybe_activate_multiplier(mission);
                if mission.multiplier_active && points > 0 {
                    points *= mission.multiplier as i64;
                    debug!(multiplier = mission.multiplier, points, "multiplier applied");
                }
                if points != 0 {
                    self.update_score(self.local_score + points, goal_score);
                }
            }
        }
    }

    /// Clamp, store, broadcast, and latch goal achievement.
    fn update_score(&mut self, new_score: i64, goal_score: i64) {
        self.local_score = new_score.max(0);
        self.state.score = self.local_score;
        self.emit(GameEvent::ScoreUpdate {
            score: self.local_score,
        });
        if !self.goal_achieved && self.local_score >= goal_score {
            self.goal_achieved = true;
            info!(
                score = self.local_score,
                goal_score, "goal achieved, level can complete"
            );
        }
    }

    fn validate_mode_hit(&mut self, mission: &mut ActiveMission, target: &ActiveTarget) -> HitOutcome {
        let def = mission.def.clone();
        match def.arcade_mode {
            ArcadeMode::GreenBlueCombo => match target.color {
                ColorCode::Green => HitOutcome::Valid {
                    points: def.points_per_green,
                },
                ColorCode::Blue => HitOutcome::Valid {
                    points: def.points_per_blue,
                },
                _ => HitOutcome::Ignored,
            },
            ArcadeMode::GreenAvoidRed => match target.color {
                ColorCode::Green => HitOutcome::Valid {
                    points: def.points_per_green,
                },
                _ => HitOutcome::Ignored,
            },
            ArcadeMode::BlueAvoidRed => match target.color {
                ColorCode::Blue => HitOutcome::Valid {
                    points: def.points_per_blue,
                },
                _ => HitOutcome::Ignored,
            },
            ArcadeMode::RotatingGreen | ArcadeMode::RotatingBlue | ArcadeMode::RotatingGreenBlue => {
                if target.is_active && matches!(target.color, ColorCode::Green | ColorCode::Blue) {
                    let points = match target.color {
                        ColorCode::Green => def.points_per_green,
                        _ => def.points_per_blue,
                    };
                    HitOutcome::Valid { points }
                } else {
                    HitOutcome::Ignored
                }
            }
            ArcadeMode::MultiHitGreen | ArcadeMode::MultiHitBlue => {
                self.validate_multi_hit(mission, target)
            }
            ArcadeMode::BlinkingGreenBonus => self.validate_blinking(mission, target, ColorCode::Green),
            ArcadeMode::BlinkingBlueBonus => self.validate_blinking(mission, target, ColorCode::Blue),
            ArcadeMode::SnakeGreen => self.validate_snake(target, ColorCode::Green, &def),
            ArcadeMode::SnakeBlue => self.validate_snake(target, ColorCode::Blue, &def),
            ArcadeMode::MemorySequence => self.validate_memory(mission, target),
            ArcadeMode::Unknown => {
                warn!(
                    error = %StrikeError::UnknownMode(format!("round {} level {}", def.round, def.level)),
                    "hit ignored"
                );
                HitOutcome::Ignored
            }
        }
    }

    fn validate_multi_hit(&mut self, mission: &mut ActiveMission, target: &ActiveTarget) -> HitOutcome {
        let wanted = match mission.def.arcade_mode {
            ArcadeMode::MultiHitGreen => ColorCode::Green,
            _ => ColorCode::Blue,
        };
        if target.color != wanted {
            return HitOutcome::Ignored;
        }

        let id = target.element_id;
        let required = mission.def.required_hits.max(1);
        let count = mission.multi_hit.entry(id).or_insert(0);
        *count += 1;
        let hits = *count;

        // Progress on every other target resets: the streak must be on the
        // same cell.
        for (other, progress) in mission.multi_hit.iter_mut() {
            if *other != id {
                *progress = 0;
            }
        }

        if hits >= required {
            info!(id, required, "multi-hit target completed");
            mission.multi_hit.insert(id, 0);
            HitOutcome::Valid {
                points: mission.def.points_per_completion,
            }
        } else {
            debug!(id, hits, required, "multi-hit progress");
            HitOutcome::Ignored
        }
    }

    fn validate_blinking(
        &mut self,
        mission: &mut ActiveMission,
        target: &ActiveTarget,
        wanted: ColorCode,
    ) -> HitOutcome {
        if target.is_bonus {
            return HitOutcome::Valid {
                points: mission.def.points_per_bonus,
            };
        }
        if target.color == wanted && target.is_valid {
            if mission.blink_lit {
                let points = match wanted {
                    ColorCode::Green => mission.def.points_per_green,
                    _ => mission.def.points_per_blue,
                };
                HitOutcome::Valid { points }
            } else {
                debug!(id = target.element_id, "blink target hit while dark, no points");
                HitOutcome::Ignored
            }
        } else {
            HitOutcome::Ignored
        }
    }

    fn validate_snake(
        &self,
        target: &ActiveTarget,
        wanted: ColorCode,
        def: &LevelDef,
    ) -> HitOutcome {
        if target.is_bonus {
            return HitOutcome::Valid {
                points: def.points_per_bonus,
            };
        }
        if target.color == wanted && target.is_active {
            let points = match wanted {
                ColorCode::Green => def.points_per_green,
                _ => def.points_per_blue,
            };
            HitOutcome::Valid { points }
        } else {
            HitOutcome::Ignored
        }
    }

    fn validate_memory(&mut self, mission: &mut ActiveMission, target: &ActiveTarget) -> HitOutcome {
        if !mission.memory_displayed {
            debug!(id = target.element_id, "sequence display in progress, hit ignored");
            return HitOutcome::Ignored;
        }
        if target.color == ColorCode::Yellow {
            return HitOutcome::Valid {
                points: mission.def.points_per_bonus,
            };
        }
        if !mission.memory_sequence.contains(&target.element_id) {
            debug!(id = target.element_id, "non-sequence target, ignored");
            return HitOutcome::Ignored;
        }

        let expected = mission.memory_sequence[mission.memory_index];
        if target.element_id == expected {
            mission.memory_index += 1;
            if mission.memory_index >= mission.memory_sequence.len() {
                info!("memory sequence reproduced");
                mission.memory_index = 0;
                HitOutcome::Valid {
                    points: mission.def.points_for_complete,
                }
            } else {
                debug!(
                    progress = mission.memory_index,
                    total = mission.memory_sequence.len(),
                    "memory sequence progress"
                );
                HitOutcome::Ignored
            }
        } else {
            warn!(
                expected,
                got = target.element_id,
                "wrong sequence element, progress reset"
            );
            mission.memory_index = 0;
            HitOutcome::Penalty {
                points: mission.def.penalty_red,
            }
        }
    }

    // ── Multiplier ─────────────────────────────────────────────────────────

    fn maybe_activate_multiplier(&mut self, mission: &mut ActiveMission) {
        let Some(cfg) = mission.def.multiplier else {
            return;
        };
        if mission.consecutive_valid_hits >= cfg.x3_after {
            self.arm_multiplier(mission, 3, cfg.x3_duration_s);
        } else if mission.consecutive_valid_hits >= cfg.x2_after {
            self.arm_multiplier(mission, 2, cfg.x2_duration_s);
        }
    }

    fn arm_multiplier(&mut self, mission: &mut ActiveMission, tier: u32, duration_s: u64) {
        if tier <= mission.multiplier && mission.multiplier_active {
            return;
        }
        mission.multiplier = tier;
        mission.multiplier_active = true;
        if let Some(task) = mission.multiplier_task.take() {
            task.abort();
        }
        let tx = self.msg_tx.clone();
        let generation = mission.generation;
        mission.multiplier_task = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(duration_s)).await;
            let _ = tx.send(EngineMsg::MultiplierExpired { generation });
        }));
        info!(tier, duration_s, "multiplier activated");
        self.set_multiplier_state(tier);
    }

    fn cancel_multiplier(&mut self, mission: &mut ActiveMission) {
        if mission.multiplier_active {
            info!(multiplier = mission.multiplier, "multiplier cancelled by trap hit");
            if let Some(task) = mission.multiplier_task.take() {
                task.abort();
            }
            mission.multiplier = 1;
            mission.multiplier_active = false;
            self.set_multiplier_state(1);
        }
        mission.consecutive_valid_hits = 0;
    }

    fn expire_multiplier(&mut self) {
        let Some(mut mission) = self.mission.take() else {
            return;
        };
        if mission.multiplier_active {
            info!(multiplier = mission.multiplier, "multiplier expired");
            mission.multiplier = 1;
            mission.multiplier_active = false;
            mission.consecutive_valid_hits = 0;
            self.set_multiplier_state(1);
        }
        self.mission = Some(mission);
    }

    fn set_multiplier_state(&mut self, tier: u32) {
        self.state.multiplier = format!("x{tier}");
        self.emit(GameEvent::MultiplierUpdate {
            multiplier: self.state.multiplier.clone(),
        });
    }

    // ── Arcade-mode activators ─────────────────────────────────────────────

    fn activate_mode(&mut self, mission: &mut ActiveMission) {
        mission.targets.clear();
        match mission.def.arcade_mode {
            ArcadeMode::GreenBlueCombo
            | ArcadeMode::GreenAvoidRed
            | ArcadeMode::BlueAvoidRed
            | ArcadeMode::MultiHitGreen
            | ArcadeMode::MultiHitBlue => self.build_static(mission),
            ArcadeMode::RotatingGreen | ArcadeMode::RotatingGreenBlue | ArcadeMode::RotatingBlue => {
                self.roll_rotation(mission);
                let period = Duration::from_millis(mission.def.rotation_delay_ms.max(1));
                self.spawn_interval(mission, period, |generation| EngineMsg::Rotate { generation });
            }
            ArcadeMode::BlinkingGreenBonus => self.build_blinking(mission, ColorCode::Green),
            ArcadeMode::BlinkingBlueBonus => self.build_blinking(mission, ColorCode::Blue),
            ArcadeMode::SnakeGreen | ArcadeMode::SnakeBlue => {
                self.roll_snake(mission);
                let period = Duration::from_millis(mission.def.rotation_delay_ms.max(1));
                self.spawn_interval(mission, period, |generation| EngineMsg::Rotate { generation });
            }
            ArcadeMode::MemorySequence => self.start_memory(mission),
            ArcadeMode::Unknown => {
                warn!(
                    error = %StrikeError::UnknownMode(format!(
                        "round {} level {}",
                        mission.def.round, mission.def.level
                    )),
                    "no targets activated"
                );
            }
        }

        let valid = mission.targets.iter().filter(|t| t.is_valid).count();
        let traps = mission.targets.iter().filter(|t| t.is_trap).count();
        debug!(
            mode = ?mission.def.arcade_mode,
            valid,
            traps,
            "arcade layout active"
        );
    }

    fn build_static(&mut self, mission: &mut ActiveMission) {
        let def = mission.def.clone();
        for &id in &def.green_targets {
            self.place_valid(mission, id, ColorCode::Green);
        }
        for &id in &def.blue_targets {
            self.place_valid(mission, id, ColorCode::Blue);
        }
        for &id in &def.red_traps {
            self.place_trap(mission, id);
        }
    }

    fn build_blinking(&mut self, mission: &mut ActiveMission, color: ColorCode) {
        let def = mission.def.clone();
        let blink_set = match color {
            ColorCode::Green => def.green_targets.clone(),
            _ => def.blue_targets.clone(),
        };
        mission.blink_targets = blink_set.clone();
        mission.blink_color = color;
        mission.blink_lit = true;
        for &id in &blink_set {
            self.place_valid(mission, id, color);
        }
        for &id in &def.red_traps {
            self.place_trap(mission, id);
        }
        self.activate_bonus(mission);
        self.spawn_interval(mission, BLINK_INTERVAL, |generation| EngineMsg::BlinkToggle {
            generation,
        });
    }

    fn roll_rotation(&mut self, mission: &mut ActiveMission) {
        let def = mission.def.clone();
        mission.targets.clear();

        let mut chosen: Vec<(u8, ColorCode)> = Vec::new();
        if matches!(
            def.arcade_mode,
            ArcadeMode::RotatingGreen | ArcadeMode::RotatingGreenBlue
        ) && let Some(&pos) = def.green_targets.choose(&mut self.rng)
        {
            chosen.push((pos, ColorCode::Green));
        }
        if matches!(
            def.arcade_mode,
            ArcadeMode::RotatingBlue | ArcadeMode::RotatingGreenBlue
        ) && let Some(&pos) = def.blue_targets.choose(&mut self.rng)
        {
            chosen.push((pos, ColorCode::Blue));
        }

        for &(pos, color) in &chosen {
            mission.targets.push(ActiveTarget::active(pos, color));
            self.light(pos, color);
        }
        // Everything else on the ring turns trap red. The HAL's state cache
        // reduces this to the two writes that actually changed.
        for id in ids::OUTER_CIRCLES {
            if !chosen.iter().any(|&(pos, _)| pos == id) {
                self.place_trap(mission, id);
            }
        }
        debug!(?chosen, "rotation rolled");
    }

    fn roll_snake(&mut self, mission: &mut ActiveMission) {
        let def = mission.def.clone();
        if def.snake_pattern.is_empty() {
            return;
        }
        mission.targets.clear();

        let (set, color) = match def.arcade_mode {
            ArcadeMode::SnakeGreen => (def.green_targets.clone(), ColorCode::Green),
            _ => (def.blue_targets.clone(), ColorCode::Blue),
        };
        let positions = def.snake_pattern[mission.snake_index % def.snake_pattern.len()].clone();

        for &id in &positions {
            mission.targets.push(ActiveTarget::active(id, color));
            self.light(id, color);
        }
        // Pattern members currently off-cycle become traps.
        for &id in &set {
            if !positions.contains(&id) {
                self.place_trap(mission, id);
            }
        }
        for &id in &def.red_traps {
            self.place_trap(mission, id);
        }
        self.activate_bonus(mission);

        debug!(index = mission.snake_index, ?positions, "snake advanced");
        mission.snake_index = (mission.snake_index + 1) % def.snake_pattern.len();
    }

    fn start_memory(&mut self, mission: &mut ActiveMission) {
        let def = mission.def.clone();
        if mission.memory_sequence.is_empty() {
            let mut pool = def.sequence_targets.clone();
            pool.shuffle(&mut self.rng);
            pool.truncate(def.sequence_length.min(pool.len()));
            mission.memory_sequence = pool;
            info!(sequence = ?mission.memory_sequence, "memory sequence generated");
        }
        mission.memory_displayed = false;
        mission.memory_index = 0;
        // Bonus section stays live (and scoreable after the display phase).
        self.activate_bonus(mission);

        let steps = mission.memory_sequence.len() * 2;
        let tx = self.msg_tx.clone();
        let generation = mission.generation;
        mission.tasks.push(tokio::spawn(async move {
            for step in 0..=steps {
                if tx.send(EngineMsg::MemoryStep { generation, step }).is_err() {
                    return;
                }
                tokio::time::sleep(MEMORY_STEP).await;
            }
        }));
    }

    fn handle_memory_step(&mut self, step: usize) {
        let Some(mut mission) = self.mission.take() else {
            return;
        };
        self.memory_step_into(&mut mission, step);
        self.mission = Some(mission);
    }

    fn memory_step_into(&mut self, mission: &mut ActiveMission, step: usize) {
        let seq = mission.memory_sequence.clone();
        let len = seq.len();
        if mission.memory_displayed || len == 0 {
            return;
        }

        if step < len * 2 {
            let id = seq[step / 2];
            let color = mission
                .def
                .sequence_color
                .unwrap_or(if id <= 4 { ColorCode::Green } else { ColorCode::Blue });
            if step % 2 == 0 {
                debug!(step = step / 2 + 1, total = len, id, "showing sequence element");
                self.light(id, color);
            } else {
                self.light(id, ColorCode::Off);
            }
        } else {
            info!("sequence display complete, reproduction phase");
            mission.memory_displayed = true;
            mission.memory_index = 0;
            // All sequence-pool circles become available but unlit; the
            // player reproduces from memory.
            mission.targets.retain(|t| t.is_bonus);
            for id in ids::OUTER_CIRCLES {
                self.light(id, ColorCode::Off);
                let color = if id <= 4 { ColorCode::Green } else { ColorCode::Blue };
                mission.targets.push(ActiveTarget::valid(id, color));
            }
        }
    }

    fn handle_rotate(&mut self) {
        let Some(mut mission) = self.mission.take() else {
            return;
        };
        match mission.def.arcade_mode {
            ArcadeMode::SnakeGreen | ArcadeMode::SnakeBlue => self.roll_snake(&mut mission),
            ArcadeMode::RotatingGreen | ArcadeMode::RotatingGreenBlue | ArcadeMode::RotatingBlue => {
                self.roll_rotation(&mut mission);
            }
            _ => {}
        }
        self.mission = Some(mission);
    }

    fn handle_blink(&mut self) {
        let Some(mut mission) = self.mission.take() else {
            return;
        };
        mission.blink_lit = !mission.blink_lit;
        let color = if mission.blink_lit {
            mission.blink_color
        } else {
            ColorCode::Off
        };
        for id in mission.blink_targets.clone() {
            self.light(id, color);
        }
        self.mission = Some(mission);
    }

    /// Generic re-roll for modes without their own animation. For the
    /// static layouts this is a plain re-render, which the HAL's state
    /// cache reduces to nothing on the wire.
    fn refresh_layout(&mut self) {
        let Some(mut mission) = self.mission.take() else {
            return;
        };
        if !mission.def.arcade_mode.manages_own_timing() {
            mission.targets.clear();
            self.build_static(&mut mission);
        }
        self.mission = Some(mission);
    }

    fn activate_bonus(&mut self, mission: &mut ActiveMission) {
        let bonus = mission.def.bonus_targets.clone();
        if bonus.is_empty() {
            return;
        }
        for &id in &bonus {
            if mission.find_target(id).is_none() {
                mission.targets.push(ActiveTarget::bonus(id));
            }
            self.light(id, ColorCode::Yellow);
        }
        self.emit(GameEvent::BonusActive { active: true });
    }

    // ── Rendering & plumbing helpers ───────────────────────────────────────

    fn place_valid(&self, mission: &mut ActiveMission, id: u8, color: ColorCode) {
        mission.targets.push(ActiveTarget::valid(id, color));
        self.light(id, color);
    }

    fn place_trap(&self, mission: &mut ActiveMission, id: u8) {
        mission.targets.push(ActiveTarget::trap(id));
        self.light(id, ColorCode::Red);
    }

    fn clear_leds(&self) {
        for id in ids::OUTER_CIRCLES {
            self.light(id, ColorCode::Off);
        }
        self.light(ids::CENTRAL_CIRCLE, ColorCode::Off);
    }

    fn light(&self, id: u8, color: ColorCode) {
        self.hal.control_led(id, color);
    }

    fn spawn_interval<F>(&self, mission: &mut ActiveMission, period: Duration, make: F)
    where
        F: Fn(u64) -> EngineMsg + Send + 'static,
    {
        let tx = self.msg_tx.clone();
        let generation = mission.generation;
        mission.tasks.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if tx.send(make(generation)).is_err() {
                    break;
                }
            }
        }));
    }

    fn emit(&self, event: GameEvent) {
        // Running headless with no connected clients is normal.
        let _ = self.bus.publish_game(event);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rounds::MultiplierConfig;
    use strike_types::HalMode;

    fn green_level(goal_score: i64, points_per_green: i64) -> LevelDef {
        LevelDef {
            round: 1,
            level: 1,
            mission: "test mission".to_string(),
            goal_score,
            arcade_mode: ArcadeMode::GreenAvoidRed,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            points_per_green,
            ..LevelDef::default()
        }
    }

    fn engine_with(levels: Vec<LevelDef>) -> (GameEngine, broadcast::Receiver<GameEvent>) {
        let bus = Arc::new(EventBus::default());
        let hal = Hal::new(HalMode::Simulation, None);
        let rx = bus.subscribe_game();
        let engine =
            GameEngine::new(hal, bus, RoundTable::new(levels), EngineConfig::default())
                .with_rng_seed(7);
        (engine, rx)
    }

    fn drain(rx: &mut broadcast::Receiver<GameEvent>) -> Vec<GameEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Run the level timer to expiry: one tick per remaining second plus
    /// the resolving tick.
    fn expire_level(engine: &mut GameEngine) {
        let ticks = engine.time_left();
        for _ in 0..=ticks {
            engine.tick_second();
        }
    }

    fn mission_generation(engine: &GameEngine) -> u64 {
        engine.current_mission().expect("mission installed").generation
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn start_game_emits_level_snapshots() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("Les Rouges");

        let events = drain(&mut rx);
        assert!(events.contains(&GameEvent::GameStarted));
        assert!(events.iter().any(|e| matches!(
            e,
            GameEvent::RoundUpdate {
                round: 1,
                level: 1,
                duration: 30,
                goal_score: 1000
            }
        )));
        assert!(events.contains(&GameEvent::ScoreUpdate { score: 0 }));
        assert!(events.contains(&GameEvent::MultiplierUpdate {
            multiplier: "x1".to_string()
        }));
        assert!(events
            .iter()
            .any(|e| matches!(e, GameEvent::TimeUpdate { time_left: 30, .. })));
        assert!(engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_ignored_while_running() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("first");
        drain(&mut rx);

        engine.start_game("second");
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn hard_reset_returns_to_idle_from_any_state() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("team");
        engine.process_game_input(1, "simulator");
        let stale_generation = mission_generation(&engine);
        drain(&mut rx);

        engine.hard_reset();

        assert!(!engine.is_running());
        assert_eq!(engine.score(), 0);
        assert!(engine.current_mission().is_none());
        assert!(drain(&mut rx).contains(&GameEvent::Reset));

        // A timer armed under the old mission must be discarded silently.
        engine.handle_msg(EngineMsg::SecondTick {
            generation: stale_generation,
        });
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn session_expiry_forces_hard_reset() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.handle_msg(EngineMsg::SessionExpired {
            generation: engine.session_generation,
        });

        assert!(!engine.is_running());
        assert!(drain(&mut rx).contains(&GameEvent::Reset));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_expiry_is_ignored() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.handle_msg(EngineMsg::SessionExpired { generation: 0 });
        assert!(engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn set_rounds_refused_while_running() {
        let (mut engine, _rx) = engine_with(vec![green_level(1000, 600)]);
        assert!(engine.set_rounds(RoundTable::builtin()).is_ok());
        engine.start_game("team");
        assert!(engine.set_rounds(RoundTable::builtin()).is_err());
    }

    // ── Input validation & scoring ────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unknown_input_id_is_a_noop() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(99, "simulator");

        assert_eq!(engine.score(), 0);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, GameEvent::ScoreUpdate { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn input_before_start_is_a_noop() {
        let (mut engine, _rx) = engine_with(vec![green_level(1000, 600)]);
        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn goal_reached_then_timer_expiry_advances_and_resets_score() {
        let second = LevelDef {
            level: 2,
            goal_score: 2000,
            ..green_level(1000, 600)
        };
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600), second]);
        engine.start_game("team");
        drain(&mut rx);

        // Two +600 hits pass the 1000-point goal and latch it.
        engine.process_game_input(1, "simulator");
        engine.process_game_input(2, "simulator");
        assert_eq!(engine.score(), 1200);
        assert!(engine.goal_achieved());

        expire_level(&mut engine);

        assert_eq!(engine.level_index(), 1);
        assert_eq!(engine.state().level, 2);
        // The next level's local score starts from zero.
        assert_eq!(engine.score(), 0);
        assert!(drain(&mut rx).contains(&GameEvent::ScoreUpdate { score: 0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn trap_hit_floors_score_at_zero() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 50)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 50);

        // -100 penalty at score 50 floors at 0, never goes negative.
        engine.process_game_input(5, "simulator");
        assert_eq!(engine.score(), 0);

        engine.process_game_input(6, "simulator");
        engine.process_game_input(7, "simulator");
        assert_eq!(engine.score(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn goal_latch_survives_later_penalties() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        engine.process_game_input(2, "simulator");
        assert!(engine.goal_achieved());

        // Drop back below the goal; the latch must hold.
        engine.process_game_input(5, "simulator");
        engine.process_game_input(6, "simulator");
        engine.process_game_input(7, "simulator");
        assert_eq!(engine.score(), 900);
        assert!(engine.goal_achieved());

        expire_level(&mut engine);
        // Single-level table: completion ends the game instead of retrying.
        assert!(!engine.is_running());
        assert!(drain(&mut rx).contains(&GameEvent::GameFinished));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_level_retries_with_score_preserved_and_fresh_layout() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 100)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 100);

        expire_level(&mut engine);

        assert!(engine.is_running());
        assert_eq!(engine.level_index(), 0);
        assert_eq!(engine.score(), 100);
        let mission = engine.current_mission().expect("retry reinstalls the mission");
        assert!(!mission.targets.is_empty());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, GameEvent::RoundUpdate { .. })));
    }

    // ── Multi-hit mode ────────────────────────────────────────────────────

    fn multi_hit_level() -> LevelDef {
        LevelDef {
            mission: "hit twice".to_string(),
            goal_score: 2200,
            arcade_mode: ArcadeMode::MultiHitGreen,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            required_hits: 2,
            points_per_completion: 120,
            ..LevelDef::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn multi_hit_scores_only_on_completion() {
        let (mut engine, mut rx) = engine_with(vec![multi_hit_level()]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 0);
        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 120);
    }

    #[tokio::test(start_paused = true)]
    async fn switching_targets_resets_multi_hit_progress() {
        let (mut engine, mut rx) = engine_with(vec![multi_hit_level()]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        // Hitting a different target resets target 1's streak.
        engine.process_game_input(2, "simulator");
        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 0);
        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 120);
    }

    // ── Multiplier ────────────────────────────────────────────────────────

    fn multiplier_level() -> LevelDef {
        LevelDef {
            goal_score: 100_000,
            multiplier: Some(MultiplierConfig {
                x2_after: 2,
                x2_duration_s: 10,
                x3_after: 4,
                x3_duration_s: 10,
            }),
            ..green_level(100_000, 100)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_hits_activate_and_apply_multiplier() {
        let (mut engine, mut rx) = engine_with(vec![multiplier_level()]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 100);

        // Second consecutive hit activates ×2 and is already multiplied.
        engine.process_game_input(2, "simulator");
        assert_eq!(engine.score(), 300);
        assert!(drain(&mut rx).contains(&GameEvent::MultiplierUpdate {
            multiplier: "x2".to_string()
        }));

        // Fourth consecutive hit escalates to ×3.
        engine.process_game_input(3, "simulator");
        engine.process_game_input(4, "simulator");
        assert_eq!(engine.score(), 300 + 200 + 300);
        assert!(drain(&mut rx).contains(&GameEvent::MultiplierUpdate {
            multiplier: "x3".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn trap_hit_cancels_multiplier_and_streak() {
        let (mut engine, mut rx) = engine_with(vec![multiplier_level()]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        engine.process_game_input(2, "simulator");
        assert_eq!(engine.score(), 300);

        engine.process_game_input(5, "simulator");
        assert_eq!(engine.score(), 200);
        assert!(drain(&mut rx).contains(&GameEvent::MultiplierUpdate {
            multiplier: "x1".to_string()
        }));

        // The streak restarted: the next hit is unmultiplied.
        engine.process_game_input(3, "simulator");
        assert_eq!(engine.score(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn multiplier_expires_after_its_duration() {
        let (mut engine, mut rx) = engine_with(vec![multiplier_level()]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        engine.process_game_input(2, "simulator");
        assert_eq!(engine.score(), 300);

        engine.handle_msg(EngineMsg::MultiplierExpired {
            generation: mission_generation(&engine),
        });

        engine.process_game_input(3, "simulator");
        assert_eq!(engine.score(), 400);
    }

    // ── Blinking mode ─────────────────────────────────────────────────────

    fn blinking_level() -> LevelDef {
        LevelDef {
            goal_score: 3000,
            arcade_mode: ArcadeMode::BlinkingGreenBonus,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: vec![9, 10, 11, 12, 13],
            points_per_green: 140,
            points_per_bonus: 50,
            ..LevelDef::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn blinking_hits_count_only_while_lit() {
        let (mut engine, mut rx) = engine_with(vec![blinking_level()]);
        engine.start_game("team");
        drain(&mut rx);

        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 140);

        engine.handle_msg(EngineMsg::BlinkToggle {
            generation: mission_generation(&engine),
        });
        engine.process_game_input(2, "simulator");
        assert_eq!(engine.score(), 140);

        engine.handle_msg(EngineMsg::BlinkToggle {
            generation: mission_generation(&engine),
        });
        engine.process_game_input(2, "simulator");
        assert_eq!(engine.score(), 280);
    }

    #[tokio::test(start_paused = true)]
    async fn bonus_targets_always_score_their_own_points() {
        let (mut engine, mut rx) = engine_with(vec![blinking_level()]);
        engine.start_game("team");
        let started = drain(&mut rx);
        assert!(started.contains(&GameEvent::BonusActive { active: true }));

        engine.process_game_input(9, "simulator");
        assert_eq!(engine.score(), 50);
        // Inner holes are input-only but still score as bonus.
        engine.process_game_input(12, "simulator");
        assert_eq!(engine.score(), 100);
    }

    // ── Rotation & snake ──────────────────────────────────────────────────

    fn rotating_level() -> LevelDef {
        LevelDef {
            goal_score: 1600,
            arcade_mode: ArcadeMode::RotatingGreen,
            green_targets: vec![1, 2, 3, 4],
            points_per_green: 80,
            rotation_delay_ms: 2000,
            ..LevelDef::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_has_one_active_target_and_traps_elsewhere() {
        let (mut engine, mut rx) = engine_with(vec![rotating_level()]);
        engine.start_game("team");
        drain(&mut rx);

        let mission = engine.current_mission().unwrap();
        let active: Vec<u8> = mission
            .targets
            .iter()
            .filter(|t| t.is_valid && t.is_active)
            .map(|t| t.element_id)
            .collect();
        let traps = mission.targets.iter().filter(|t| t.is_trap).count();
        assert_eq!(active.len(), 1);
        assert_eq!(traps, 7);

        engine.process_game_input(active[0], "simulator");
        assert_eq!(engine.score(), 80);

        // A trap position punishes and floors at zero.
        let trap_id = engine
            .current_mission()
            .unwrap()
            .targets
            .iter()
            .find(|t| t.is_trap)
            .unwrap()
            .element_id;
        engine.process_game_input(trap_id, "simulator");
        assert_eq!(engine.score(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_rolls_a_fresh_layout_on_each_tick() {
        let (mut engine, mut rx) = engine_with(vec![rotating_level()]);
        engine.start_game("team");
        drain(&mut rx);

        for _ in 0..5 {
            engine.handle_msg(EngineMsg::Rotate {
                generation: mission_generation(&engine),
            });
            let mission = engine.current_mission().unwrap();
            let active = mission
                .targets
                .iter()
                .filter(|t| t.is_valid && t.is_active)
                .count();
            assert_eq!(active, 1);
            assert_eq!(mission.targets.len(), 8);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn snake_advances_through_the_authored_pattern() {
        let level = LevelDef {
            goal_score: 3600,
            arcade_mode: ArcadeMode::SnakeGreen,
            green_targets: vec![1, 2, 3, 4],
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: vec![9],
            snake_pattern: vec![vec![1, 2], vec![2, 4], vec![4, 3], vec![3, 1]],
            points_per_green: 160,
            points_per_bonus: 50,
            ..LevelDef::default()
        };
        let (mut engine, mut rx) = engine_with(vec![level]);
        engine.start_game("team");
        drain(&mut rx);

        let actives = |engine: &GameEngine| -> Vec<u8> {
            let mut ids: Vec<u8> = engine
                .current_mission()
                .unwrap()
                .targets
                .iter()
                .filter(|t| t.is_valid && t.is_active)
                .map(|t| t.element_id)
                .collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(actives(&engine), vec![1, 2]);

        engine.handle_msg(EngineMsg::Rotate {
            generation: mission_generation(&engine),
        });
        assert_eq!(actives(&engine), vec![2, 4]);
        // The straggler from the previous step is a trap now.
        assert!(engine.current_mission().unwrap().find_target(1).unwrap().is_trap);

        engine.process_game_input(4, "simulator");
        assert_eq!(engine.score(), 160);
    }

    // ── Memory sequence ───────────────────────────────────────────────────

    fn memory_level() -> LevelDef {
        LevelDef {
            goal_score: 4000,
            arcade_mode: ArcadeMode::MemorySequence,
            sequence_targets: vec![1, 2, 3, 4],
            sequence_length: 3,
            sequence_color: Some(ColorCode::Green),
            red_traps: vec![5, 6, 7, 8],
            bonus_targets: vec![9],
            points_for_complete: 3900,
            points_per_bonus: 50,
            ..LevelDef::default()
        }
    }

    /// Pump every display step so the mission enters the reproduction
    /// phase.
    fn run_display_phase(engine: &mut GameEngine) -> Vec<u8> {
        let generation = mission_generation(engine);
        let sequence = engine
            .current_mission()
            .unwrap()
            .memory_sequence
            .clone();
        for step in 0..=sequence.len() * 2 {
            engine.handle_msg(EngineMsg::MemoryStep { generation, step });
        }
        assert!(engine.current_mission().unwrap().memory_displayed);
        sequence
    }

    #[tokio::test(start_paused = true)]
    async fn memory_generates_a_duplicate_free_sequence() {
        let (mut engine, mut rx) = engine_with(vec![memory_level()]);
        engine.start_game("team");
        drain(&mut rx);

        let sequence = engine.current_mission().unwrap().memory_sequence.clone();
        assert_eq!(sequence.len(), 3);
        let mut unique = sequence.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3, "sequence must not repeat elements");
        assert!(sequence.iter().all(|id| (1..=4).contains(id)));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_hits_are_ignored_during_display() {
        let (mut engine, mut rx) = engine_with(vec![memory_level()]);
        engine.start_game("team");
        drain(&mut rx);

        let first = engine.current_mission().unwrap().memory_sequence[0];
        engine.process_game_input(first, "simulator");
        assert_eq!(engine.score(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_reproduction_in_order_awards_completion_points() {
        let (mut engine, mut rx) = engine_with(vec![memory_level()]);
        engine.start_game("team");
        drain(&mut rx);

        let sequence = run_display_phase(&mut engine);
        for &id in &sequence[..sequence.len() - 1] {
            engine.process_game_input(id, "simulator");
            assert_eq!(engine.score(), 0);
        }
        engine.process_game_input(sequence[sequence.len() - 1], "simulator");
        assert_eq!(engine.score(), 3900);
        // Completion alone sits just below the goal; bonus hits close it.
        assert!(!engine.goal_achieved());
        engine.process_game_input(9, "simulator");
        engine.process_game_input(9, "simulator");
        assert_eq!(engine.score(), 4000);
        assert!(engine.goal_achieved());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_wrong_element_penalises_and_resets_progress() {
        let (mut engine, mut rx) = engine_with(vec![memory_level()]);
        engine.start_game("team");
        drain(&mut rx);

        let sequence = run_display_phase(&mut engine);
        engine.process_game_input(sequence[0], "simulator");
        // Out-of-order hit: penalty (floored) and progress reset.
        engine.process_game_input(sequence[2], "simulator");
        assert_eq!(engine.score(), 0);
        assert_eq!(engine.current_mission().unwrap().memory_index, 0);

        // The same sequence can still be completed from scratch.
        for &id in &sequence {
            engine.process_game_input(id, "simulator");
        }
        assert_eq!(engine.score(), 3900);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_non_sequence_targets_are_ignored_in_reproduction() {
        let (mut engine, mut rx) = engine_with(vec![memory_level()]);
        engine.start_game("team");
        drain(&mut rx);

        let sequence = run_display_phase(&mut engine);
        let outsider = (1..=4u8).find(|id| !sequence.contains(id)).unwrap();
        engine.process_game_input(outsider, "simulator");
        assert_eq!(engine.score(), 0);
        assert_eq!(engine.current_mission().unwrap().memory_index, 0);
    }

    // ── Unknown content ───────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn unknown_mode_activates_nothing_and_never_crashes() {
        let level = LevelDef {
            goal_score: 100,
            arcade_mode: ArcadeMode::Unknown,
            ..LevelDef::default()
        };
        let (mut engine, mut rx) = engine_with(vec![level]);
        engine.start_game("team");
        drain(&mut rx);

        assert!(engine.current_mission().unwrap().targets.is_empty());
        engine.process_game_input(1, "simulator");
        assert_eq!(engine.score(), 0);
        assert!(engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_hardware_input_code_is_ignored() {
        let (mut engine, mut rx) = engine_with(vec![green_level(1000, 600)]);
        engine.start_game("team");
        drain(&mut rx);

        engine.handle_control(ControlEvent::InputEvent {
            code: "bogus".to_string(),
            value: 3,
        });
        assert_eq!(engine.score(), 0);
        assert!(engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn format_time_renders_minutes_and_seconds() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(65), "01:05");
        assert_eq!(format_time(600), "10:00");
    }
}
