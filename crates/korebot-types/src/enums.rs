//! Enumeration types shared by the decision engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Decision layers
// ---------------------------------------------------------------------------

/// A decision tier. Layers are evaluated in declaration order each tick;
/// the first layer that produces a successful action wins.
///
/// Config files may also use the upper-case tier names
/// (`REFLEX`, `TACTICAL`, `SUBCONSCIOUS`, `CONSCIOUS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Instant rule checks with a sub-millisecond budget.
    #[serde(alias = "REFLEX")]
    Reflex,
    /// Rule-based tactics, kiting and target selection.
    #[serde(alias = "TACTICAL")]
    Tactical,
    /// Learned or pattern-based behavior.
    #[serde(alias = "SUBCONSCIOUS", alias = "LEARNED")]
    Learned,
    /// Remote reasoning, consumed through the cached memo.
    #[serde(alias = "CONSCIOUS", alias = "REASONING")]
    Reasoning,
}

impl Layer {
    /// All layers in evaluation order.
    pub const ORDERED: [Self; 4] = [Self::Reflex, Self::Tactical, Self::Learned, Self::Reasoning];

    /// Lowercase name used in logs and config files.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reflex => "reflex",
            Self::Tactical => "tactical",
            Self::Learned => "learned",
            Self::Reasoning => "reasoning",
        }
    }

    /// Position of this layer in [`Layer::ORDERED`].
    pub const fn index(self) -> usize {
        match self {
            Self::Reflex => 0,
            Self::Tactical => 1,
            Self::Learned => 2,
            Self::Reasoning => 3,
        }
    }
}

impl core::fmt::Display for Layer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Elements
// ---------------------------------------------------------------------------

/// Attack or defense element of a character weapon or a monster.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Element {
    /// No elemental affinity.
    #[default]
    #[serde(alias = "Neutral", alias = "NEUTRAL")]
    Neutral,
    /// Fire.
    #[serde(alias = "Fire", alias = "FIRE")]
    Fire,
    /// Water.
    #[serde(alias = "Water", alias = "WATER")]
    Water,
    /// Earth.
    #[serde(alias = "Earth", alias = "EARTH")]
    Earth,
    /// Wind.
    #[serde(alias = "Wind", alias = "WIND")]
    Wind,
    /// Holy.
    #[serde(alias = "Holy", alias = "HOLY")]
    Holy,
    /// Shadow (dark).
    #[serde(alias = "Shadow", alias = "SHADOW", alias = "dark")]
    Shadow,
    /// Poison.
    #[serde(alias = "Poison", alias = "POISON")]
    Poison,
    /// Ghost.
    #[serde(alias = "Ghost", alias = "GHOST")]
    Ghost,
    /// Undead.
    #[serde(alias = "Undead", alias = "UNDEAD")]
    Undead,
}

impl Element {
    /// Lowercase name, matching the serialized form.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Fire => "fire",
            Self::Water => "water",
            Self::Earth => "earth",
            Self::Wind => "wind",
            Self::Holy => "holy",
            Self::Shadow => "shadow",
            Self::Poison => "poison",
            Self::Ghost => "ghost",
            Self::Undead => "undead",
        }
    }
}

impl core::fmt::Display for Element {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Execution mode
// ---------------------------------------------------------------------------

/// How the executor runs an action handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Wait for the handler, bounded by the action timeout.
    #[default]
    Sync,
    /// Spawn the handler and report success immediately.
    #[serde(alias = "async")]
    FireAndForget,
}

// ---------------------------------------------------------------------------
// Kiting state
// ---------------------------------------------------------------------------

/// State of the combat-distance state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KitingState {
    /// No combat movement required.
    #[default]
    Idle,
    /// Closing distance toward the enemy.
    Approach,
    /// Inside the preferred band; attack without moving.
    Attack,
    /// Too close or under pressure; step away.
    Retreat,
    /// HP critical; run as far as possible.
    EmergencyFlee,
}

impl KitingState {
    /// Upper-case state name used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Approach => "APPROACH",
            Self::Attack => "ATTACK",
            Self::Retreat => "RETREAT",
            Self::EmergencyFlee => "EMERGENCY_FLEE",
        }
    }
}

impl core::fmt::Display for KitingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
