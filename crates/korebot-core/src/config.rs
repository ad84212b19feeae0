//! Tuning tables for the tactical modules.
//!
//! Every number the kiting engine and target selector use lives here, with
//! defaults matching the shipped values. A YAML file may override any
//! subset:
//!
//! ```yaml
//! kiting:
//!   classes:
//!     hunter: { min_distance: 8, optimal_distance: 10, max_distance: 12,
//!               emergency_distance: 4, emergency_hp_threshold: 0.2 }
//! targeting:
//!   weights:
//!     mvp: 2000
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use korebot_types::Element;

use crate::error::ConfigError;

/// Top-level tuning configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// Kiting engine parameters.
    pub kiting: KitingTuning,
    /// Target selector parameters.
    pub targeting: TargetingTuning,
}

impl TuningConfig {
    /// Load tuning from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse tuning from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Kiting
// ---------------------------------------------------------------------------

/// Distance band and emergency thresholds for one job class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KitingConfig {
    /// Closer than this is too close.
    pub min_distance: f64,
    /// Preferred fighting distance.
    pub optimal_distance: f64,
    /// Farther than this is out of range.
    pub max_distance: f64,
    /// Base flee distance.
    pub emergency_distance: f64,
    /// HP fraction at or below which the character flees.
    pub emergency_hp_threshold: f64,
}

impl KitingConfig {
    /// Construct a class entry.
    pub const fn new(min: f64, optimal: f64, max: f64, emergency: f64, emergency_hp: f64) -> Self {
        Self {
            min_distance: min,
            optimal_distance: optimal,
            max_distance: max,
            emergency_distance: emergency,
            emergency_hp_threshold: emergency_hp,
        }
    }
}

impl Default for KitingConfig {
    fn default() -> Self {
        Self::new(5.0, 7.0, 9.0, 3.0, 0.20)
    }
}

/// Kiting engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitingTuning {
    /// Per-class distance bands, keyed by normalized job name.
    pub classes: BTreeMap<String, KitingConfig>,
    /// Band for classes not listed.
    pub fallback: KitingConfig,
    /// HP fraction at or below which a targeted character retreats.
    pub pressure_hp_threshold: f64,
    /// Cells moved per retreat step.
    pub retreat_step: f64,
    /// Extra cells added to the emergency distance when fleeing.
    pub flee_extra_distance: f64,
    /// Perturbation bound for retreat and flee targets.
    pub retreat_jitter: f64,
    /// Perturbation bound for approach targets.
    pub approach_jitter: f64,
    /// Repeats of the same target that count as stuck.
    pub stuck_ticks: u32,
    /// Bound of the random offset applied when stuck.
    pub stuck_offset: i32,
    /// Below this HP fraction skills are not recommended.
    pub skill_min_hp: f64,
}

impl Default for KitingTuning {
    fn default() -> Self {
        let classes = [
            ("archer", KitingConfig::new(5.0, 7.0, 9.0, 3.0, 0.20)),
            ("hunter", KitingConfig::new(7.0, 9.0, 11.0, 4.0, 0.20)),
            ("dancer", KitingConfig::new(6.0, 8.0, 10.0, 3.0, 0.20)),
            ("bard", KitingConfig::new(6.0, 8.0, 10.0, 3.0, 0.20)),
            ("mage", KitingConfig::new(6.0, 8.0, 10.0, 4.0, 0.20)),
            ("wizard", KitingConfig::new(7.0, 9.0, 11.0, 4.0, 0.20)),
            ("sage", KitingConfig::new(6.0, 8.0, 10.0, 4.0, 0.20)),
            ("professor", KitingConfig::new(6.0, 8.0, 10.0, 4.0, 0.20)),
            ("gunslinger", KitingConfig::new(4.0, 6.0, 8.0, 2.0, 0.20)),
            ("ranger", KitingConfig::new(8.0, 10.0, 12.0, 5.0, 0.20)),
            ("warlock", KitingConfig::new(7.0, 9.0, 11.0, 5.0, 0.20)),
            ("sorcerer", KitingConfig::new(6.0, 8.0, 10.0, 4.0, 0.20)),
            ("genetic", KitingConfig::new(5.0, 7.0, 9.0, 3.0, 0.25)),
            ("shadow_chaser", KitingConfig::new(4.0, 6.0, 8.0, 2.0, 0.25)),
        ]
        .into_iter()
        .map(|(name, config)| (name.to_owned(), config))
        .collect();

        Self {
            classes,
            fallback: KitingConfig::default(),
            pressure_hp_threshold: 0.40,
            retreat_step: 3.0,
            flee_extra_distance: 3.0,
            retreat_jitter: 1.5,
            approach_jitter: 0.5,
            stuck_ticks: 3,
            stuck_offset: 2,
            skill_min_hp: 0.30,
        }
    }
}

impl KitingTuning {
    /// Band for a job class. Names are matched lowercased with spaces
    /// replaced by underscores; unknown classes get the fallback.
    pub fn for_class(&self, job_class: &str) -> KitingConfig {
        let key = job_class.trim().to_lowercase().replace(' ', "_");
        self.classes.get(&key).copied().unwrap_or(self.fallback)
    }
}

// ---------------------------------------------------------------------------
// Targeting
// ---------------------------------------------------------------------------

/// Score contributions of the target selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetWeights {
    /// Bonus for MVP monsters.
    pub mvp: f64,
    /// Bonus for boss monsters.
    pub boss: f64,
    /// Bonus for monsters attacking us.
    pub targeting_us: f64,
    /// Bonus for quest targets.
    pub quest: f64,
    /// Peak bonus for monsters near our level.
    pub optimal_level: f64,
    /// Peak bonus for nearly dead monsters.
    pub low_hp: f64,
    /// Scale of the elemental advantage term.
    pub element: f64,
    /// Bonus for passive monsters.
    pub passive: f64,
    /// Bonus for aggressive monsters.
    pub aggressive: f64,
    /// Penalty per cell of distance.
    pub distance_per_cell: f64,
    /// Scale applied to the efficiency term.
    pub efficiency_scale: f64,
    /// Share of experience per second in the efficiency term.
    pub xp_share: f64,
    /// Share of loot value per second in the efficiency term.
    pub loot_share: f64,
    /// Level difference that still earns a proximity bonus.
    pub level_window: f64,
    /// Level difference beyond which a penalty applies.
    pub level_penalty_start: f64,
    /// Penalty per level beyond the start.
    pub level_penalty_per_level: f64,
    /// Maximum level penalty.
    pub level_penalty_cap: f64,
    /// HP ratio at or below which the finisher bonus applies.
    pub low_hp_ratio: f64,
    /// A new target must beat the locked one by this factor.
    pub switch_factor: f64,
}

impl Default for TargetWeights {
    fn default() -> Self {
        Self {
            mvp: 1000.0,
            boss: 500.0,
            targeting_us: 200.0,
            quest: 150.0,
            optimal_level: 100.0,
            low_hp: 75.0,
            element: 120.0,
            passive: 10.0,
            aggressive: 50.0,
            distance_per_cell: 2.0,
            efficiency_scale: 0.1,
            xp_share: 0.6,
            loot_share: 0.4,
            level_window: 5.0,
            level_penalty_start: 10.0,
            level_penalty_per_level: 5.0,
            level_penalty_cap: 50.0,
            low_hp_ratio: 0.30,
            switch_factor: 1.5,
        }
    }
}

/// Elemental advantage steps, attacker element to defender element.
///
/// Missing pairs are neutral (step 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementTable {
    /// `steps[attacker][defender]`.
    pub steps: BTreeMap<Element, BTreeMap<Element, f64>>,
    /// Multiplier slope for steps other than -1, 0 and 1.
    pub fractional_step_scale: f64,
}

impl Default for ElementTable {
    fn default() -> Self {
        use Element::{Earth, Fire, Ghost, Holy, Neutral, Poison, Shadow, Undead, Water, Wind};
        let rows: [(Element, &[(Element, f64)]); 10] = [
            (Neutral, &[(Fire, 0.0), (Water, 0.0), (Earth, 0.0), (Wind, 0.0)]),
            (Fire, &[(Water, -1.0), (Earth, 1.0), (Wind, 1.0)]),
            (Water, &[(Fire, 1.0), (Earth, -1.0), (Wind, 0.0)]),
            (Earth, &[(Fire, -1.0), (Water, 1.0), (Wind, -1.0)]),
            (Wind, &[(Water, 1.0), (Earth, 1.0), (Fire, 0.0)]),
            (Holy, &[(Shadow, 1.0), (Undead, 1.0)]),
            (Shadow, &[(Holy, -1.0)]),
            (Poison, &[(Neutral, 0.25)]),
            (Ghost, &[(Ghost, 1.0)]),
            (Undead, &[(Holy, -1.0)]),
        ];
        let steps = rows
            .into_iter()
            .map(|(attacker, row)| (attacker, row.iter().copied().collect()))
            .collect();
        Self {
            steps,
            fractional_step_scale: 0.25,
        }
    }
}

impl ElementTable {
    /// Raw advantage step of `attacker` against `defender`.
    pub fn step(&self, attacker: Element, defender: Element) -> f64 {
        self.steps
            .get(&attacker)
            .and_then(|row| row.get(&defender))
            .copied()
            .unwrap_or(0.0)
    }

    /// Damage multiplier: step -1 halves, 0 is neutral, 1 doubles; other
    /// steps scale linearly by `fractional_step_scale`.
    pub fn multiplier(&self, attacker: Element, defender: Element) -> f64 {
        let step = self.step(attacker, defender);
        if (step + 1.0).abs() < f64::EPSILON {
            0.5
        } else if step.abs() < f64::EPSILON {
            1.0
        } else if (step - 1.0).abs() < f64::EPSILON {
            2.0
        } else {
            step.mul_add(self.fractional_step_scale, 1.0)
        }
    }
}

/// Loot value estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LootTable {
    /// Known values by monster id.
    pub values: BTreeMap<u64, f64>,
    /// Fallback value per monster level.
    pub per_level: f64,
    /// Fallback multiplier for MVPs.
    pub mvp_multiplier: f64,
    /// Fallback multiplier for bosses.
    pub boss_multiplier: f64,
}

impl Default for LootTable {
    fn default() -> Self {
        let values = [
            (1002, 50.0),
            (1007, 150.0),
            (1031, 300.0),
            (1113, 5_000.0),
            (1115, 50_000.0),
            (1511, 80_000.0),
        ]
        .into_iter()
        .collect();
        Self {
            values,
            per_level: 10.0,
            mvp_multiplier: 100.0,
            boss_multiplier: 10.0,
        }
    }
}

/// A damage bonus granted once when any of its status names is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffBonus {
    /// Status names that grant the bonus, matched case-insensitively.
    pub names: Vec<String>,
    /// Damage multiplier.
    pub multiplier: f64,
}

impl BuffBonus {
    fn new(names: &[&str], multiplier: f64) -> Self {
        Self {
            names: names.iter().map(|n| (*n).to_owned()).collect(),
            multiplier,
        }
    }

    /// Whether any of `active` grants this bonus.
    pub fn applies(&self, active: &[String]) -> bool {
        self.names
            .iter()
            .any(|name| active.iter().any(|s| s.eq_ignore_ascii_case(name)))
    }
}

/// Damage-per-second estimate parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DpsTuning {
    /// Attack speed that maps to a factor of zero before clamping.
    pub aspd_base: f64,
    /// Attack speed points per unit of speed factor.
    pub aspd_divisor: f64,
    /// Lower clamp of the speed factor.
    pub min_speed_factor: f64,
    /// Upper clamp of the speed factor.
    pub max_speed_factor: f64,
    /// Damage bonuses from active buffs.
    pub buffs: Vec<BuffBonus>,
}

impl Default for DpsTuning {
    fn default() -> Self {
        Self {
            aspd_base: 100.0,
            aspd_divisor: 50.0,
            min_speed_factor: 0.5,
            max_speed_factor: 3.0,
            buffs: vec![
                BuffBonus::new(&["blessing", "al_blessing"], 1.2),
                BuffBonus::new(&["increase_agi", "al_incagi"], 1.1),
            ],
        }
    }
}

impl DpsTuning {
    /// Product of the multipliers of every bonus that applies.
    pub fn buff_multiplier(&self, active: &[String]) -> f64 {
        self.buffs
            .iter()
            .filter(|b| b.applies(active))
            .map(|b| b.multiplier)
            .product()
    }
}

/// Target selector parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingTuning {
    /// Score weights.
    pub weights: TargetWeights,
    /// Element chart.
    pub elements: ElementTable,
    /// Loot estimates.
    pub loot: LootTable,
    /// DPS estimate.
    pub dps: DpsTuning,
}
