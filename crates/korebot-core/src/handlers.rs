//! Built-in action handlers.
//!
//! Each handler turns the matched snapshot into a payload carrying a game
//! `command` for the host to send. The tactical handlers own the stateful
//! modules: [`Kite`] holds the kiting sessions and [`SelectTarget`] holds
//! the target lock, each behind its own mutex.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use korebot_types::{KitingState, MonsterId, MonsterInfo};

use crate::config::{KitingTuning, TargetingTuning, TuningConfig};
use crate::executor::{ActionHandler, HandlerContext, HandlerTable};
use crate::kiting::{JitterFactory, KitingSessions};
use crate::random::RngJitter;
use crate::targeting::TargetSelector;

/// Healing items tried in order when the action names none.
pub const DEFAULT_HEAL_ITEMS: [&str; 4] = ["White Potion", "Yellow Potion", "Orange Potion", "Red Potion"];

/// Command sent when no healing item is held.
pub const DEFAULT_HEAL_FALLBACK: &str = "sl heal";

/// Build the table of built-in handlers:
/// `emergency_heal`, `kite`, `select_target` and `command`.
pub fn builtin_handlers(tuning: &TuningConfig) -> HandlerTable {
    let jitter: JitterFactory = Box::new(|| Box::new(RngJitter::from_os_rng()));
    HandlerTable::new()
        .with("emergency_heal", Arc::new(EmergencyHeal))
        .with("kite", Arc::new(Kite::new(Arc::new(tuning.kiting.clone()), jitter)))
        .with(
            "select_target",
            Arc::new(SelectTarget::new(Arc::new(tuning.targeting.clone()))),
        )
        .with("command", Arc::new(Command))
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()
    })
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Passes the `command` parameter through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Command;

#[async_trait]
impl ActionHandler for Command {
    async fn handle(&self, ctx: HandlerContext) -> Result<Value, String> {
        let command = ctx
            .param_str("command")
            .ok_or_else(|| "missing `command` parameter".to_owned())?;
        Ok(json!({ "command": command }))
    }
}

// ---------------------------------------------------------------------------
// Emergency heal
// ---------------------------------------------------------------------------

/// Uses the first held healing item, or falls back to a heal skill.
///
/// Params: `items` (ordered item names), `fallback_command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmergencyHeal;

#[async_trait]
impl ActionHandler for EmergencyHeal {
    async fn handle(&self, ctx: HandlerContext) -> Result<Value, String> {
        let items = string_list(ctx.params.get("items"))
            .unwrap_or_else(|| DEFAULT_HEAL_ITEMS.iter().map(|s| (*s).to_owned()).collect());

        let held = items
            .iter()
            .find(|name| ctx.snapshot.item_amount(name).is_some_and(|n| n > 0));

        if let Some(item) = held {
            return Ok(json!({
                "command": format!("is {item}"),
                "item": item,
                "hp_percent": ctx.snapshot.character.hp_percent(),
            }));
        }

        let fallback = ctx
            .param_str("fallback_command")
            .unwrap_or(DEFAULT_HEAL_FALLBACK);
        debug!(trigger_id = %ctx.trigger_id, "no healing item held, using fallback");
        Ok(json!({
            "command": fallback,
            "item": Value::Null,
            "hp_percent": ctx.snapshot.character.hp_percent(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Kite
// ---------------------------------------------------------------------------

/// Runs one kiting update against the enemy in focus.
///
/// The enemy is the monster named by the `target_id` param, else the
/// nearest monster targeting us, else the nearest monster. With nothing in
/// view the combat session ends and the action fails.
pub struct Kite {
    sessions: Mutex<KitingSessions>,
}

impl core::fmt::Debug for Kite {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kite").finish_non_exhaustive()
    }
}

impl Kite {
    /// Create the handler with its own session holder.
    pub fn new(tuning: Arc<KitingTuning>, jitter: JitterFactory) -> Self {
        Self {
            sessions: Mutex::new(KitingSessions::new(tuning, jitter)),
        }
    }
}

fn focus_enemy<'a>(ctx: &'a HandlerContext) -> Option<&'a MonsterInfo> {
    let snapshot = &ctx.snapshot;
    if let Some(id) = ctx.params.get("target_id").and_then(Value::as_u64)
        && let Some(monster) = snapshot.monster(MonsterId(id))
    {
        return Some(monster);
    }
    let here = snapshot.character.position;
    snapshot
        .monsters
        .iter()
        .filter(|m| m.targeting_us)
        .min_by(|a, b| {
            here.distance_to(a.position)
                .total_cmp(&here.distance_to(b.position))
        })
        .or_else(|| snapshot.nearest_monster())
}

#[async_trait]
impl ActionHandler for Kite {
    async fn handle(&self, ctx: HandlerContext) -> Result<Value, String> {
        let mut sessions = self.sessions.lock().await;

        let Some(enemy) = focus_enemy(&ctx) else {
            sessions.end_combat();
            return Err("no enemy in view".to_owned());
        };

        let character = &ctx.snapshot.character;
        let engine = sessions.engine_for(&character.job_class);
        let update = engine.update(
            character.position,
            enemy.position,
            character.hp_ratio(),
            enemy.targeting_us,
        );

        let command = match (update.state, update.movement) {
            (_, Some(to)) => Some(format!("move {} {}", to.x, to.y)),
            (KitingState::Attack, None) => Some(format!("attack {}", enemy.id)),
            _ => None,
        };

        Ok(json!({
            "state": update.state,
            "command": command,
            "movement": update.movement,
            "target": enemy.id,
            "distance": update.distance,
            "reason": update.reason,
            "unstuck": update.unstuck,
        }))
    }
}

// ---------------------------------------------------------------------------
// Select target
// ---------------------------------------------------------------------------

/// Scores visible monsters and attacks the selected one.
///
/// Params: `quest_targets` (monster ids earning the quest bonus).
#[derive(Debug)]
pub struct SelectTarget {
    selector: Mutex<TargetSelector>,
}

impl SelectTarget {
    /// Create the handler with a fresh target lock.
    pub fn new(tuning: Arc<TargetingTuning>) -> Self {
        Self {
            selector: Mutex::new(TargetSelector::new(tuning)),
        }
    }
}

#[async_trait]
impl ActionHandler for SelectTarget {
    async fn handle(&self, ctx: HandlerContext) -> Result<Value, String> {
        let quest_targets: Vec<MonsterId> = ctx
            .params
            .get("quest_targets")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_u64).map(MonsterId).collect())
            .unwrap_or_default();

        let snapshot = &ctx.snapshot;
        let mut selector = self.selector.lock().await;
        let Some(best) = selector.select_best_target(
            &snapshot.monsters,
            &snapshot.character,
            &quest_targets,
            snapshot.tick,
        ) else {
            selector.clear_target();
            return Err("no targets in view".to_owned());
        };

        Ok(json!({
            "command": format!("attack {}", best.monster_id),
            "target": best,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::ScriptedJitter;
    use korebot_types::StateSnapshot;

    fn ctx(snapshot: serde_json::Value, params: Value) -> HandlerContext {
        let snapshot: StateSnapshot = serde_json::from_value(snapshot)
            .unwrap_or_else(|e| panic!("bad test snapshot: {e}"));
        HandlerContext {
            trigger_id: "t".to_owned(),
            params,
            snapshot: Arc::new(snapshot),
        }
    }

    fn base(monsters: Value, inventory: Value) -> Value {
        json!({
            "tick": 4,
            "character": {
                "name": "Tester", "job_class": "archer", "level": 50,
                "hp": 20, "max_hp": 100, "position": { "x": 0, "y": 0 },
                "attack": 100
            },
            "monsters": monsters,
            "inventory": inventory,
        })
    }

    #[tokio::test]
    async fn command_passes_through() {
        let out = Command
            .handle(ctx(base(json!([]), json!([])), json!({ "command": "sit" })))
            .await;
        assert_eq!(out, Ok(json!({ "command": "sit" })));

        let missing = Command.handle(ctx(base(json!([]), json!([])), json!({}))).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn heal_uses_first_held_item() {
        let inventory = json!([
            { "item_id": 501, "name": "Red Potion", "amount": 5 },
            { "item_id": 503, "name": "Yellow Potion", "amount": 2 }
        ]);
        let out = EmergencyHeal
            .handle(ctx(base(json!([]), inventory), json!({})))
            .await
            .unwrap_or_default();
        assert_eq!(out["command"], "is Yellow Potion");
        assert_eq!(out["item"], "Yellow Potion");
    }

    #[tokio::test]
    async fn heal_falls_back_without_items() {
        let out = EmergencyHeal
            .handle(ctx(base(json!([]), json!([])), json!({ "items": ["Apple"] })))
            .await
            .unwrap_or_default();
        assert_eq!(out["command"], DEFAULT_HEAL_FALLBACK);

        let custom = EmergencyHeal
            .handle(ctx(
                base(json!([]), json!([])),
                json!({ "fallback_command": "skills Teleport" }),
            ))
            .await
            .unwrap_or_default();
        assert_eq!(custom["command"], "skills Teleport");
    }

    fn kite() -> Kite {
        Kite::new(
            Arc::new(KitingTuning::default()),
            Box::new(|| Box::new(ScriptedJitter::zero())),
        )
    }

    #[tokio::test]
    async fn kite_prefers_monster_targeting_us() {
        let monsters = json!([
            { "id": 1, "position": { "x": 2, "y": 0 } },
            { "id": 2, "position": { "x": 0, "y": 7 }, "targeting_us": true }
        ]);
        let mut snapshot = base(monsters, json!([]));
        snapshot["character"]["hp"] = json!(90);
        let out = kite()
            .handle(ctx(snapshot, json!({})))
            .await
            .unwrap_or_default();
        assert_eq!(out["target"], 2);
        assert_eq!(out["state"], "ATTACK");
        assert_eq!(out["command"], "attack 2");
    }

    #[tokio::test]
    async fn kite_retreats_from_close_enemy() {
        let monsters = json!([{ "id": 9, "position": { "x": 0, "y": 2 } }]);
        let mut snapshot = base(monsters, json!([]));
        snapshot["character"]["hp"] = json!(90);
        let out = kite()
            .handle(ctx(snapshot, json!({})))
            .await
            .unwrap_or_default();
        assert_eq!(out["state"], "RETREAT");
        assert_eq!(out["command"], "move 0 -3");
    }

    #[tokio::test]
    async fn kite_without_enemy_fails_and_ends_session() {
        let handler = kite();
        let monsters = json!([{ "id": 9, "position": { "x": 0, "y": 20 } }]);
        let _ = handler.handle(ctx(base(monsters, json!([])), json!({}))).await;
        assert!(handler.sessions.lock().await.current().is_some());

        let out = handler.handle(ctx(base(json!([]), json!([])), json!({}))).await;
        assert!(out.is_err());
        assert!(handler.sessions.lock().await.current().is_none());
    }

    #[tokio::test]
    async fn select_target_attacks_quest_target() {
        let monsters = json!([
            { "id": 1, "level": 50, "position": { "x": 3, "y": 0 }, "hp": 100, "max_hp": 100 },
            { "id": 2, "level": 50, "position": { "x": 3, "y": 0 }, "hp": 100, "max_hp": 100 }
        ]);
        let handler = SelectTarget::new(Arc::new(TargetingTuning::default()));
        let out = handler
            .handle(ctx(base(monsters, json!([])), json!({ "quest_targets": [2] })))
            .await
            .unwrap_or_default();
        assert_eq!(out["command"], "attack 2");
        assert_eq!(out["target"]["monster_id"], 2);
        assert_eq!(
            handler.selector.lock().await.current_lock().map(|l| l.locked_at_tick),
            Some(4)
        );
    }

    #[tokio::test]
    async fn select_target_with_nothing_in_view_fails() {
        let handler = SelectTarget::new(Arc::new(TargetingTuning::default()));
        let out = handler.handle(ctx(base(json!([]), json!([])), json!({}))).await;
        assert!(out.is_err());
    }

    #[test]
    fn builtin_table_has_tactical_handlers() {
        let table = builtin_handlers(&TuningConfig::default());
        let mut ids = table.handler_ids();
        ids.sort();
        assert_eq!(ids, vec!["command", "emergency_heal", "kite", "select_target"]);
    }
}
