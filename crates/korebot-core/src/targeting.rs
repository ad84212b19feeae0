//! Multi-factor target scoring with a hysteresis lock.
//!
//! Every visible monster gets a score built from farming efficiency
//! (experience and loot per second of estimated fighting time), flat priority
//! bonuses, level proximity, a finisher bonus for nearly dead monsters,
//! elemental advantage and a distance penalty. Once a target is locked the
//! selector keeps it until an alternative beats it by more than
//! `switch_factor - 1` times the magnitude of its score, which for positive
//! scores means more than `switch_factor` times the score.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use korebot_types::{CharacterState, MonsterId, MonsterInfo};

use crate::config::TargetingTuning;

/// Efficiency above which the term is mentioned in the breakdown.
const NOTABLE_EFFICIENCY: f64 = 10.0;

/// Effective HP assumed when a monster reports none.
const UNKNOWN_MONSTER_HP: f64 = 1000.0;

/// Score and breakdown for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetScore {
    /// Monster scored.
    pub monster_id: MonsterId,
    /// Its display name.
    pub monster_name: String,
    /// Total score; higher is better.
    pub score: f64,
    /// Distance from the character in cells.
    pub distance: f64,
    /// Base experience per second of fighting.
    pub xp_efficiency: f64,
    /// Loot value per second of fighting.
    pub zeny_efficiency: f64,
    /// Estimated seconds to kill.
    pub time_to_kill: f64,
    /// Human-readable score contributions.
    pub reasons: Vec<String>,
}

/// The currently favored monster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetLock {
    /// Locked monster.
    pub monster_id: MonsterId,
    /// Tick at which the lock was taken.
    pub locked_at_tick: u64,
}

/// Selection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TargetMetrics {
    /// Calls that had at least one candidate.
    pub selection_count: u64,
    /// Selections that replaced a present locked target.
    pub target_switches: u64,
    /// `target_switches / selection_count` as a percentage.
    pub switch_rate: f64,
}

/// Scores candidates and remembers the current target.
#[derive(Debug)]
pub struct TargetSelector {
    tuning: Arc<TargetingTuning>,
    lock: Option<TargetLock>,
    selection_count: u64,
    target_switches: u64,
}

impl TargetSelector {
    /// Create a selector with no lock.
    pub const fn new(tuning: Arc<TargetingTuning>) -> Self {
        Self {
            tuning,
            lock: None,
            selection_count: 0,
            target_switches: 0,
        }
    }

    /// Pick the best target among `monsters`.
    ///
    /// With a lock whose monster is still visible, the locked monster is
    /// kept unless [`should_switch`] says the best candidate is far enough
    /// ahead.
    pub fn select_best_target(
        &mut self,
        monsters: &[MonsterInfo],
        character: &CharacterState,
        quest_targets: &[MonsterId],
        tick: u64,
    ) -> Option<TargetScore> {
        if monsters.is_empty() {
            return None;
        }
        self.selection_count = self.selection_count.saturating_add(1);

        let mut scored: Vec<TargetScore> = monsters
            .iter()
            .map(|m| self.score_monster(m, character, quest_targets))
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let best = scored.first()?.clone();

        if let Some(lock) = self.lock
            && let Some(current) = scored.iter().find(|s| s.monster_id == lock.monster_id)
        {
            if best.monster_id == current.monster_id {
                return Some(best);
            }
            if !should_switch(current.score, best.score, self.tuning.weights.switch_factor) {
                debug!(
                    locked = %current.monster_id,
                    current = current.score,
                    best = best.score,
                    "keeping locked target"
                );
                return Some(current.clone());
            }
            self.target_switches = self.target_switches.saturating_add(1);
            debug!(
                from = %current.monster_id,
                to = %best.monster_id,
                current = current.score,
                best = best.score,
                "switching target"
            );
        }

        self.lock = Some(TargetLock {
            monster_id: best.monster_id,
            locked_at_tick: tick,
        });
        Some(best)
    }

    /// Score one monster for `character`.
    pub fn score_monster(
        &self,
        monster: &MonsterInfo,
        character: &CharacterState,
        quest_targets: &[MonsterId],
    ) -> TargetScore {
        let w = &self.tuning.weights;
        let mut score = 0.0;
        let mut reasons = Vec::new();

        let distance = character.position.distance_to(monster.position);

        let effective_hp = match (monster.max_hp, monster.hp) {
            (0, 0) => UNKNOWN_MONSTER_HP,
            (0, hp) => f64::from(hp),
            (max, _) => f64::from(max),
        };
        let time_to_kill = (effective_hp / self.estimate_dps(character).max(1.0)).max(1.0);

        let xp_efficiency = f64::from(monster.base_exp) / time_to_kill;
        let zeny_efficiency = self.estimate_loot(monster) / time_to_kill;
        let efficiency = xp_efficiency.mul_add(w.xp_share, zeny_efficiency * w.loot_share)
            * w.efficiency_scale;
        score += efficiency;
        if efficiency > NOTABLE_EFFICIENCY {
            reasons.push(format!("high efficiency: {efficiency:.1}"));
        }

        if monster.is_mvp {
            score += w.mvp;
            reasons.push(format!("mvp +{:.0}", w.mvp));
        }
        if monster.is_boss {
            score += w.boss;
            reasons.push(format!("boss +{:.0}", w.boss));
        }
        if monster.targeting_us {
            score += w.targeting_us;
            reasons.push(format!("targeting us +{:.0}", w.targeting_us));
        }
        if quest_targets.contains(&monster.id) {
            score += w.quest;
            reasons.push(format!("quest target +{:.0}", w.quest));
        }

        let level_diff = (f64::from(character.level) - f64::from(monster.level)).abs();
        if level_diff <= w.level_window {
            let bonus = w.optimal_level * (1.0 - level_diff / (w.level_window * 2.0));
            score += bonus;
            reasons.push(format!("level optimal +{bonus:.0}"));
        } else if level_diff > w.level_penalty_start {
            let penalty = ((level_diff - w.level_penalty_start) * w.level_penalty_per_level)
                .min(w.level_penalty_cap);
            score -= penalty;
            reasons.push(format!("level penalty -{penalty:.0}"));
        }

        let hp_ratio = f64::from(monster.hp) / effective_hp.max(1.0);
        if hp_ratio <= w.low_hp_ratio {
            let bonus = w.low_hp * (1.0 - hp_ratio);
            score += bonus;
            reasons.push(format!("low hp +{bonus:.0}"));
        }

        let element = self
            .tuning
            .elements
            .multiplier(character.element, monster.element);
        if element > 1.0 {
            let bonus = w.element * (element - 1.0);
            score += bonus;
            reasons.push(format!("element advantage +{bonus:.0}"));
        } else if element < 1.0 {
            let penalty = w.element * (1.0 - element);
            score -= penalty;
            reasons.push(format!("element disadvantage -{penalty:.0}"));
        }

        score -= distance * w.distance_per_cell;
        score += if monster.aggressive { w.aggressive } else { w.passive };

        if reasons.is_empty() {
            reasons.push(format!("standard target (dist={distance:.1})"));
        }

        TargetScore {
            monster_id: monster.id,
            monster_name: monster.name.clone(),
            score,
            distance,
            xp_efficiency,
            zeny_efficiency,
            time_to_kill,
            reasons,
        }
    }

    /// Damage per second from the stronger of attack and magic attack.
    pub fn estimate_dps(&self, character: &CharacterState) -> f64 {
        let dps = &self.tuning.dps;
        let base = f64::from(character.attack.max(character.matk));
        let rate = ((f64::from(character.aspd) - dps.aspd_base) / dps.aspd_divisor)
            .clamp(dps.min_speed_factor, dps.max_speed_factor);
        base * rate * dps.buff_multiplier(&character.status_effects)
    }

    /// Loot value of a kill, from the table or estimated from level.
    pub fn estimate_loot(&self, monster: &MonsterInfo) -> f64 {
        let loot = &self.tuning.loot;
        if let Some(value) = loot.values.get(&monster.id.into_inner()) {
            return *value;
        }
        let base = f64::from(monster.level) * loot.per_level;
        if monster.is_mvp {
            base * loot.mvp_multiplier
        } else if monster.is_boss {
            base * loot.boss_multiplier
        } else {
            base
        }
    }

    /// Lock onto `monster_id` regardless of score.
    pub fn force_target(&mut self, monster_id: MonsterId, tick: u64) {
        self.lock = Some(TargetLock {
            monster_id,
            locked_at_tick: tick,
        });
        info!(monster_id = %monster_id, "target force-locked");
    }

    /// Forget the current target, e.g. after it died.
    pub fn clear_target(&mut self) {
        self.lock = None;
    }

    /// The current lock, if any.
    pub const fn current_lock(&self) -> Option<TargetLock> {
        self.lock
    }

    /// Selection counters.
    #[allow(clippy::cast_precision_loss)]
    pub fn metrics(&self) -> TargetMetrics {
        let rate = self.target_switches as f64 / self.selection_count.max(1) as f64 * 100.0;
        TargetMetrics {
            selection_count: self.selection_count,
            target_switches: self.target_switches,
            switch_rate: rate,
        }
    }
}

/// Whether `best` beats the locked `current` score by enough to switch.
///
/// The margin scales with `|current|`, so negative scores keep the lock as
/// firmly as positive ones. A margin exactly at the threshold keeps it.
pub fn should_switch(current: f64, best: f64, switch_factor: f64) -> bool {
    best - current > (switch_factor - 1.0) * current.abs()
}

/// First MVP among `monsters`, if any.
pub fn first_mvp(monsters: &[MonsterInfo]) -> Option<&MonsterInfo> {
    monsters.iter().find(|m| m.is_mvp)
}
