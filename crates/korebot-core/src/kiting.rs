//! Combat-distance state machine for ranged classes.
//!
//! Each update classifies the situation into one of five states and, for
//! the moving states, computes the cell to walk to. Transitions are checked
//! in order and the first match wins:
//!
//! | # | Condition | State |
//! |---|-----------|-------|
//! | 1 | `hp <= emergency_hp_threshold` | `EMERGENCY_FLEE` |
//! | 2 | `distance < min_distance` | `RETREAT` |
//! | 3 | `hp <= 0.40` and the enemy targets us | `RETREAT` |
//! | 4 | `distance > max_distance` | `APPROACH` |
//! | 5 | `min <= distance <= max` and `hp > 0.40` | `ATTACK` |
//! | 6 | otherwise | `IDLE` |
//!
//! Movement targets carry a small random perturbation. If the same target
//! comes out several updates in a row the engine assumes the character is
//! stuck and nudges the target by a random offset.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use korebot_types::{KitingState, Position};

use crate::config::{KitingConfig, KitingTuning};
use crate::random::Jitter;

/// Result of one state-machine update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KitingUpdate {
    /// State after the update.
    pub state: KitingState,
    /// Cell to move to; `None` for `ATTACK` and `IDLE`.
    pub movement: Option<Position>,
    /// Human-readable explanation.
    pub reason: String,
    /// Distance to the enemy at update time.
    pub distance: f64,
    /// The anti-stuck offset was applied.
    pub unstuck: bool,
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KitingMetrics {
    /// Updates that resolved to `RETREAT`.
    pub retreats: u64,
    /// Updates that resolved to `EMERGENCY_FLEE`.
    pub emergency_flees: u64,
    /// Updates that resolved to `ATTACK`.
    pub attacks: u64,
    /// Updates that resolved to `APPROACH`.
    pub approaches: u64,
    /// Updates whose state differed from the previous one.
    pub state_changes: u64,
    /// All updates.
    pub total_updates: u64,
}

/// A kiting session for one character and job class.
pub struct KitingEngine {
    job_class: String,
    config: KitingConfig,
    tuning: Arc<KitingTuning>,
    current_state: KitingState,
    previous_state: KitingState,
    last_target: Option<Position>,
    stuck_counter: u32,
    metrics: KitingMetrics,
    jitter: Box<dyn Jitter>,
}

impl core::fmt::Debug for KitingEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KitingEngine")
            .field("job_class", &self.job_class)
            .field("config", &self.config)
            .field("current_state", &self.current_state)
            .field("previous_state", &self.previous_state)
            .field("last_target", &self.last_target)
            .field("stuck_counter", &self.stuck_counter)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

impl KitingEngine {
    /// Start a session using the tuning entry for `job_class`.
    pub fn new(job_class: &str, tuning: Arc<KitingTuning>, jitter: Box<dyn Jitter>) -> Self {
        let config = tuning.for_class(job_class);
        info!(
            job_class = %job_class,
            min = config.min_distance,
            optimal = config.optimal_distance,
            max = config.max_distance,
            "kiting session started"
        );
        Self::with_config(job_class, config, tuning, jitter)
    }

    /// Start a session with an explicit distance band.
    pub fn with_config(
        job_class: &str,
        config: KitingConfig,
        tuning: Arc<KitingTuning>,
        jitter: Box<dyn Jitter>,
    ) -> Self {
        Self {
            job_class: job_class.to_owned(),
            config,
            tuning,
            current_state: KitingState::Idle,
            previous_state: KitingState::Idle,
            last_target: None,
            stuck_counter: 0,
            metrics: KitingMetrics::default(),
            jitter,
        }
    }

    /// Job class this session was created for.
    pub fn job_class(&self) -> &str {
        &self.job_class
    }

    /// Active distance band.
    pub const fn config(&self) -> &KitingConfig {
        &self.config
    }

    /// State after the last update.
    pub const fn current_state(&self) -> KitingState {
        self.current_state
    }

    /// State before the last state change.
    pub const fn previous_state(&self) -> KitingState {
        self.previous_state
    }

    /// Counters since the session started or the last reset.
    pub const fn metrics(&self) -> KitingMetrics {
        self.metrics
    }

    /// Zero the counters.
    pub fn reset_metrics(&mut self) {
        self.metrics = KitingMetrics::default();
    }

    /// Advance the state machine.
    ///
    /// `hp` is the character's HP fraction in `[0, 1]`.
    pub fn update(
        &mut self,
        character: Position,
        enemy: Position,
        hp: f64,
        enemy_targeting_us: bool,
    ) -> KitingUpdate {
        self.metrics.total_updates = self.metrics.total_updates.saturating_add(1);

        let distance = character.distance_to(enemy);
        let state = self.determine_state(distance, hp, enemy_targeting_us);

        if state != self.current_state {
            self.metrics.state_changes = self.metrics.state_changes.saturating_add(1);
            self.previous_state = self.current_state;
            self.current_state = state;
            debug!(
                from = %self.previous_state,
                to = %state,
                distance,
                hp,
                "kiting state changed"
            );
        }

        let (mut movement, mut reason) = self.execute_state(state, character, enemy, distance, hp);

        let mut unstuck = false;
        if movement.is_some() && movement == self.last_target {
            self.stuck_counter = self.stuck_counter.saturating_add(1);
            if self.stuck_counter >= self.tuning.stuck_ticks {
                movement = movement.map(|target| self.random_offset(target));
                reason.push_str(" (unstuck)");
                unstuck = true;
                self.stuck_counter = 0;
            }
        } else {
            self.stuck_counter = 0;
        }
        self.last_target = movement;

        KitingUpdate {
            state,
            movement,
            reason,
            distance,
            unstuck,
        }
    }

    /// Classify the situation. First matching rule wins.
    pub fn determine_state(&self, distance: f64, hp: f64, enemy_targeting_us: bool) -> KitingState {
        let c = &self.config;
        let pressure = self.tuning.pressure_hp_threshold;

        if hp <= c.emergency_hp_threshold {
            KitingState::EmergencyFlee
        } else if distance < c.min_distance || (hp <= pressure && enemy_targeting_us) {
            KitingState::Retreat
        } else if distance > c.max_distance {
            KitingState::Approach
        } else if hp > pressure {
            KitingState::Attack
        } else {
            KitingState::Idle
        }
    }

    /// Whether `distance` lies inside the attack band.
    pub fn is_in_attack_range(&self, distance: f64) -> bool {
        (self.config.min_distance..=self.config.max_distance).contains(&distance)
    }

    /// Whether skills are worth using at this distance and HP fraction.
    pub fn should_use_skill(&self, distance: f64, hp: f64) -> bool {
        if distance < self.config.min_distance || hp < self.tuning.skill_min_hp {
            return false;
        }
        self.is_in_attack_range(distance)
    }

    /// Skill range to prefer for this class.
    pub const fn recommended_skill_range(&self) -> f64 {
        self.config.optimal_distance
    }

    fn execute_state(
        &mut self,
        state: KitingState,
        character: Position,
        enemy: Position,
        distance: f64,
        hp: f64,
    ) -> (Option<Position>, String) {
        let m = &mut self.metrics;
        match state {
            KitingState::EmergencyFlee => {
                m.emergency_flees = m.emergency_flees.saturating_add(1);
                let flee = self.config.emergency_distance + self.tuning.flee_extra_distance;
                let target = self.retreat_position(character, enemy, flee);
                (Some(target), format!("emergency flee: hp={:.0}%", hp * 100.0))
            }
            KitingState::Retreat => {
                m.retreats = m.retreats.saturating_add(1);
                let target = self.retreat_position(character, enemy, self.tuning.retreat_step);
                (
                    Some(target),
                    format!("retreating: distance {distance:.1}, hp={:.0}%", hp * 100.0),
                )
            }
            KitingState::Approach => {
                m.approaches = m.approaches.saturating_add(1);
                let target = self.approach_position(character, enemy);
                (
                    Some(target),
                    format!("approaching: distance {distance:.1} > {}", self.config.max_distance),
                )
            }
            KitingState::Attack => {
                m.attacks = m.attacks.saturating_add(1);
                (None, format!("attacking at distance {distance:.1}"))
            }
            KitingState::Idle => (None, "idle".to_owned()),
        }
    }

    /// Step `step` cells directly away from the enemy.
    fn retreat_position(&mut self, character: Position, enemy: Position, step: f64) -> Position {
        let dx = f64::from(character.x) - f64::from(enemy.x);
        let dy = f64::from(character.y) - f64::from(enemy.y);
        let magnitude = match dx.hypot(dy) {
            m if m == 0.0 => 1.0,
            m => m,
        };
        let bound = self.tuning.retreat_jitter;
        let variance = self.jitter.uniform(-bound, bound);
        Position::new(
            to_cell((dx / magnitude).mul_add(step, f64::from(character.x)) + variance),
            to_cell((dy / magnitude).mul_add(step, f64::from(character.y)) + variance),
        )
    }

    /// Walk toward the enemy until `optimal_distance` away.
    fn approach_position(&mut self, character: Position, enemy: Position) -> Position {
        let dx = f64::from(enemy.x) - f64::from(character.x);
        let dy = f64::from(enemy.y) - f64::from(character.y);
        let magnitude = dx.hypot(dy);
        if magnitude == 0.0 {
            return character;
        }
        let travel = magnitude - self.config.optimal_distance;
        let bound = self.tuning.approach_jitter;
        let variance = self.jitter.uniform(-bound, bound);
        Position::new(
            to_cell((dx / magnitude).mul_add(travel, f64::from(character.x)) + variance),
            to_cell((dy / magnitude).mul_add(travel, f64::from(character.y)) + variance),
        )
    }

    fn random_offset(&mut self, target: Position) -> Position {
        let bound = self.tuning.stuck_offset;
        let ox = self.jitter.offset(-bound, bound);
        let oy = self.jitter.offset(-bound, bound);
        Position::new(target.x.saturating_add(ox), target.y.saturating_add(oy))
    }
}

/// Truncate toward zero onto the grid.
#[allow(clippy::cast_possible_truncation)]
fn to_cell(v: f64) -> i32 {
    v.trunc() as i32
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Builds a fresh randomness source for each new session.
pub type JitterFactory = Box<dyn Fn() -> Box<dyn Jitter> + Send + Sync>;

/// Holds the kiting session of the current combat.
///
/// A session lives until combat ends or the job class changes, at which
/// point it is replaced and its counters start over.
pub struct KitingSessions {
    tuning: Arc<KitingTuning>,
    jitter: JitterFactory,
    active: Option<KitingEngine>,
}

impl core::fmt::Debug for KitingSessions {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KitingSessions")
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl KitingSessions {
    /// Create an empty session holder.
    pub fn new(tuning: Arc<KitingTuning>, jitter: JitterFactory) -> Self {
        Self {
            tuning,
            jitter,
            active: None,
        }
    }

    /// The session for `job_class`, created or replaced as needed.
    pub fn engine_for(&mut self, job_class: &str) -> &mut KitingEngine {
        let replace = self
            .active
            .as_ref()
            .is_none_or(|engine| !engine.job_class().eq_ignore_ascii_case(job_class));
        if replace {
            let engine = KitingEngine::new(job_class, Arc::clone(&self.tuning), (self.jitter)());
            self.active = Some(engine);
        }
        self.active.get_or_insert_with(|| {
            KitingEngine::new(job_class, Arc::clone(&self.tuning), (self.jitter)())
        })
    }

    /// The running session, if any.
    pub const fn current(&self) -> Option<&KitingEngine> {
        self.active.as_ref()
    }

    /// Drop the running session.
    pub fn end_combat(&mut self) {
        if let Some(engine) = self.active.take() {
            debug!(job_class = %engine.job_class(), metrics = ?engine.metrics(), "kiting session ended");
        }
    }
}
