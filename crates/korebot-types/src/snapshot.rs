//! The per-tick world snapshot.
//!
//! A [`StateSnapshot`] is built fresh from host input each tick, shared
//! read-only behind an `Arc` for the duration of the tick, and dropped
//! afterwards. Trigger conditions read it through [`StateSnapshot::resolve`],
//! which maps dotted field paths to typed [`FieldValue`]s.

use serde::{Deserialize, Serialize};

use crate::enums::Element;
use crate::ids::MonsterId;

/// Attack speed assumed when the host does not report one.
const DEFAULT_ASPD: u32 = 150;

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

/// A cell on the integer map grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    /// Grid column.
    pub x: i32,
    /// Grid row.
    pub y: i32,
}

impl Position {
    /// Construct a position.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another cell.
    pub fn distance_to(self, other: Self) -> f64 {
        let dx = f64::from(other.x) - f64::from(self.x);
        let dy = f64::from(other.y) - f64::from(self.y);
        dx.hypot(dy)
    }
}

// ---------------------------------------------------------------------------
// Character
// ---------------------------------------------------------------------------

/// The controlled character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// Character name.
    pub name: String,
    /// Job class, e.g. `"Hunter"` or `"shadow_chaser"`.
    #[serde(default)]
    pub job_class: String,
    /// Base level.
    #[serde(default)]
    pub level: u32,
    /// Job level.
    #[serde(default)]
    pub job_level: u32,
    /// Current hit points.
    pub hp: u32,
    /// Maximum hit points.
    pub max_hp: u32,
    /// Current skill points.
    #[serde(default)]
    pub sp: u32,
    /// Maximum skill points.
    #[serde(default)]
    pub max_sp: u32,
    /// Current map name.
    #[serde(default)]
    pub map: String,
    /// Grid position on the current map.
    #[serde(default)]
    pub position: Position,
    /// Carried weight.
    #[serde(default)]
    pub weight: u32,
    /// Weight limit.
    #[serde(default)]
    pub max_weight: u32,
    /// Money held.
    #[serde(default)]
    pub zeny: u64,
    /// Physical attack.
    #[serde(default)]
    pub attack: u32,
    /// Magic attack.
    #[serde(default)]
    pub matk: u32,
    /// Attack speed.
    #[serde(default = "default_aspd")]
    pub aspd: u32,
    /// Element of the equipped weapon.
    #[serde(default)]
    pub element: Element,
    /// Active status effects and buffs, by name.
    #[serde(default, alias = "buffs")]
    pub status_effects: Vec<String>,
}

const fn default_aspd() -> u32 {
    DEFAULT_ASPD
}

/// Ratio of `value` to `max` in `[0, 1]`; zero when `max` is zero.
///
/// Field resolution treats a zero `max` as "not reported" instead, see
/// [`percent`].
fn ratio(value: u32, max: u32) -> f64 {
    if max == 0 {
        return 0.0;
    }
    (f64::from(value) / f64::from(max)).clamp(0.0, 1.0)
}

/// A percentage field, absent when the host did not report its maximum.
fn percent(max: u32, value: f64) -> Option<FieldValue> {
    (max > 0).then_some(FieldValue::Number(value))
}

impl CharacterState {
    /// HP as a fraction in `[0, 1]`.
    pub fn hp_ratio(&self) -> f64 {
        ratio(self.hp, self.max_hp)
    }

    /// HP as a percentage in `[0, 100]`.
    pub fn hp_percent(&self) -> f64 {
        self.hp_ratio() * 100.0
    }

    /// SP as a percentage in `[0, 100]`.
    pub fn sp_percent(&self) -> f64 {
        ratio(self.sp, self.max_sp) * 100.0
    }

    /// Carried weight as a percentage of the limit.
    pub fn weight_percent(&self) -> f64 {
        ratio(self.weight, self.max_weight) * 100.0
    }

    /// Whether a named status effect is active (case-insensitive).
    pub fn has_status(&self, name: &str) -> bool {
        self.status_effects.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
}

// ---------------------------------------------------------------------------
// World entities
// ---------------------------------------------------------------------------

/// A monster visible to the character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsterInfo {
    /// Server-assigned id.
    pub id: MonsterId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Monster level.
    #[serde(default)]
    pub level: u32,
    /// Grid position.
    pub position: Position,
    /// Current hit points.
    #[serde(default)]
    pub hp: u32,
    /// Maximum hit points.
    #[serde(default)]
    pub max_hp: u32,
    /// Base experience granted on kill.
    #[serde(default)]
    pub base_exp: u32,
    /// Job experience granted on kill.
    #[serde(default)]
    pub job_exp: u32,
    /// Defense element.
    #[serde(default)]
    pub element: Element,
    /// Attacks on sight.
    #[serde(default)]
    pub aggressive: bool,
    /// Currently attacking the character.
    #[serde(default)]
    pub targeting_us: bool,
    /// Boss-class monster.
    #[serde(default)]
    pub is_boss: bool,
    /// MVP-class monster.
    #[serde(default)]
    pub is_mvp: bool,
}

impl MonsterInfo {
    /// Remaining HP as a fraction in `[0, 1]`. Unknown max HP counts as full.
    pub fn hp_ratio(&self) -> f64 {
        if self.max_hp == 0 {
            return 1.0;
        }
        ratio(self.hp, self.max_hp)
    }
}

/// An inventory stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Item database id.
    pub item_id: u32,
    /// Display name.
    pub name: String,
    /// Stack size.
    pub amount: u32,
    /// Item category (usable, equip, etc).
    #[serde(default)]
    pub item_type: String,
}

/// Another player nearby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyPlayer {
    /// Player name.
    pub name: String,
    /// Base level.
    #[serde(default)]
    pub level: u32,
    /// Guild name, if any.
    #[serde(default)]
    pub guild: Option<String>,
    /// Distance from the character in cells.
    #[serde(default)]
    pub distance: f64,
    /// Member of our party.
    #[serde(default)]
    pub in_party: bool,
}

// ---------------------------------------------------------------------------
// Reasoning memo
// ---------------------------------------------------------------------------

/// The most recent completed remote-reasoning result.
///
/// Attached to the snapshot by the agent loop so reasoning-layer triggers
/// can act on it. A memo flagged `late` arrived after its request deadline;
/// it is still readable but was never applied to the tick that asked for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningMemo {
    /// Provider that answered.
    pub provider: String,
    /// Model that answered.
    pub model: String,
    /// Suggested handler id, if the reply could be parsed.
    #[serde(default)]
    pub action: Option<String>,
    /// Parameters for the suggested handler.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Free-text justification from the provider.
    #[serde(default)]
    pub reason: Option<String>,
    /// Tick at which the request was submitted.
    pub requested_tick: u64,
    /// Tick at which the result was drained.
    pub completed_tick: u64,
    /// Arrived after the request deadline.
    #[serde(default)]
    pub late: bool,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A typed value read from the snapshot by a field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A numeric field.
    Number(f64),
    /// A boolean field.
    Bool(bool),
    /// A text field.
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value. Text is parsed; booleans are not numbers.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// String view used for non-numeric comparison.
    pub fn to_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

#[allow(clippy::cast_precision_loss)]
fn count(n: usize) -> FieldValue {
    FieldValue::Number(n as f64)
}

#[allow(clippy::cast_precision_loss)]
fn big(n: u64) -> FieldValue {
    FieldValue::Number(n as f64)
}

/// Read-only aggregate of everything the agent knows this tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Host tick counter.
    pub tick: u64,
    /// The controlled character.
    pub character: CharacterState,
    /// Visible monsters.
    #[serde(default)]
    pub monsters: Vec<MonsterInfo>,
    /// Inventory stacks.
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    /// Other players in range.
    #[serde(default)]
    pub nearby_players: Vec<NearbyPlayer>,
    /// Cached remote-reasoning result, attached by the agent loop.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningMemo>,
}

impl StateSnapshot {
    /// Return this snapshot with the reasoning memo replaced.
    #[must_use]
    pub fn with_reasoning(mut self, memo: Option<ReasoningMemo>) -> Self {
        self.reasoning = memo;
        self
    }

    /// Look up a visible monster by id.
    pub fn monster(&self, id: MonsterId) -> Option<&MonsterInfo> {
        self.monsters.iter().find(|m| m.id == id)
    }

    /// The visible monster closest to the character.
    pub fn nearest_monster(&self) -> Option<&MonsterInfo> {
        let here = self.character.position;
        self.monsters.iter().min_by(|a, b| {
            here.distance_to(a.position)
                .total_cmp(&here.distance_to(b.position))
        })
    }

    /// Total amount of a named item across stacks (case-insensitive).
    pub fn item_amount(&self, name: &str) -> Option<u32> {
        let mut found = false;
        let mut total = 0u32;
        for item in self.inventory.iter().filter(|i| i.name.eq_ignore_ascii_case(name)) {
            found = true;
            total = total.saturating_add(item.amount);
        }
        found.then_some(total)
    }

    /// Resolve a dotted field path to a value.
    ///
    /// Unknown paths, and known paths with no value this tick (e.g.
    /// `monsters.nearest_distance` with nothing in view), resolve to `None`.
    pub fn resolve(&self, path: &str) -> Option<FieldValue> {
        let (root, rest) = path.split_once('.').unwrap_or((path, ""));
        match root {
            "tick" if rest.is_empty() => Some(big(self.tick)),
            "hp_percent" | "sp_percent" if rest.is_empty() => self.resolve_character(root),
            "character" => self.resolve_character(rest),
            "monsters" => self.resolve_monsters(rest),
            "inventory" => self.resolve_inventory(rest),
            "players" => self.resolve_players(rest),
            "reasoning" => self.resolve_reasoning(rest),
            _ => None,
        }
    }

    fn resolve_character(&self, field: &str) -> Option<FieldValue> {
        let c = &self.character;
        if let Some(effect) = field.strip_prefix("status.") {
            return Some(c.has_status(effect).into());
        }
        let value = match field {
            "name" => c.name.as_str().into(),
            "job_class" => c.job_class.as_str().into(),
            "map" => c.map.as_str().into(),
            "element" => c.element.as_str().into(),
            "level" => c.level.into(),
            "job_level" => c.job_level.into(),
            "hp" => c.hp.into(),
            "max_hp" => c.max_hp.into(),
            "sp" => c.sp.into(),
            "max_sp" => c.max_sp.into(),
            "weight" => c.weight.into(),
            "max_weight" => c.max_weight.into(),
            "zeny" => big(c.zeny),
            "attack" => c.attack.into(),
            "matk" => c.matk.into(),
            "aspd" => c.aspd.into(),
            "x" => FieldValue::Number(f64::from(c.position.x)),
            "y" => FieldValue::Number(f64::from(c.position.y)),
            "hp_percent" => return percent(c.max_hp, c.hp_percent()),
            "sp_percent" => return percent(c.max_sp, c.sp_percent()),
            "weight_percent" => return percent(c.max_weight, c.weight_percent()),
            _ => return None,
        };
        Some(value)
    }

    fn resolve_monsters(&self, field: &str) -> Option<FieldValue> {
        let value = match field {
            "count" => count(self.monsters.len()),
            "aggressive_count" => count(self.monsters.iter().filter(|m| m.aggressive).count()),
            "targeting_count" => count(self.monsters.iter().filter(|m| m.targeting_us).count()),
            "has_mvp" => self.monsters.iter().any(|m| m.is_mvp).into(),
            "has_boss" => self.monsters.iter().any(|m| m.is_boss).into(),
            "nearest_distance" => {
                let nearest = self.nearest_monster()?;
                self.character.position.distance_to(nearest.position).into()
            }
            _ => return None,
        };
        Some(value)
    }

    fn resolve_inventory(&self, field: &str) -> Option<FieldValue> {
        if field == "count" {
            return Some(count(self.inventory.len()));
        }
        let name = field.strip_prefix("item.")?;
        self.item_amount(name).map(FieldValue::from)
    }

    fn resolve_players(&self, field: &str) -> Option<FieldValue> {
        match field {
            "count" => Some(count(self.nearby_players.len())),
            "party_count" => Some(count(self.nearby_players.iter().filter(|p| p.in_party).count())),
            _ => None,
        }
    }

    fn resolve_reasoning(&self, field: &str) -> Option<FieldValue> {
        let memo = self.reasoning.as_ref()?;
        match field {
            "action" => memo.action.as_deref().map(FieldValue::from),
            "provider" => Some(memo.provider.as_str().into()),
            "reason" => memo.reason.as_deref().map(FieldValue::from),
            "age_ticks" => Some(big(self.tick.saturating_sub(memo.completed_tick))),
            "late" => Some(memo.late.into()),
            _ => None,
        }
    }
}
