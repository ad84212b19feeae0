//! Triggers, their actions, and the on-disk definition form.
//!
//! A [`Trigger`] is immutable once registered. Its runtime state (enabled
//! flag, last-fired instant, counters) lives in the registry so the
//! definition can be shared across tasks without locking.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use korebot_types::{ExecutionMode, Layer};

use crate::condition::Condition;

/// Timeout applied when an action definition does not name one.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_millis(1_000);

/// What a trigger does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Handler id looked up in the handler table.
    pub handler: String,
    /// Parameter bag passed to the handler.
    pub params: serde_json::Value,
    /// Wait for the handler, or spawn and move on.
    pub mode: ExecutionMode,
    /// Upper bound on a sync handler's run time.
    pub timeout: Duration,
}

impl Action {
    /// A sync action with no parameters and the default timeout.
    pub fn new(handler: &str) -> Self {
        Self {
            handler: handler.to_owned(),
            params: serde_json::Value::Object(serde_json::Map::new()),
            mode: ExecutionMode::Sync,
            timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    /// Replace the parameter bag.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Replace the execution mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Replace the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A rule: when `condition` holds on `layer`, run `action`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    /// Unique id within a registry.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Decision tier.
    pub layer: Layer,
    /// Order within the layer; lower runs first.
    pub priority: i32,
    /// When to fire.
    pub condition: Condition,
    /// What to run.
    pub action: Action,
    /// Minimum time between firings.
    pub cooldown: Duration,
    /// Initial enabled state.
    pub enabled: bool,
    /// Free-text description.
    pub description: String,
    /// Free-form labels.
    pub tags: Vec<String>,
}

impl Trigger {
    /// A trigger with no cooldown, enabled, named after its id.
    pub fn new(id: &str, layer: Layer, priority: i32, condition: Condition, action: Action) -> Self {
        Self {
            id: id.to_owned(),
            name: id.to_owned(),
            layer,
            priority,
            condition,
            action,
            cooldown: Duration::ZERO,
            enabled: true,
            description: String::new(),
            tags: Vec::new(),
        }
    }

    /// Replace the cooldown.
    #[must_use]
    pub const fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Convert to the serializable config form.
    pub fn to_definition(&self) -> TriggerDefinition {
        TriggerDefinition {
            trigger_id: self.id.clone(),
            name: self.name.clone(),
            layer: self.layer,
            priority: self.priority,
            condition: self.condition.clone(),
            action: ActionDefinition {
                handler: self.action.handler.clone(),
                params: self.action.params.clone(),
                mode: self.action.mode,
                timeout_ms: duration_ms(self.action.timeout),
            },
            cooldown_ms: duration_ms(self.cooldown),
            enabled: self.enabled,
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

// ---------------------------------------------------------------------------
// Config form
// ---------------------------------------------------------------------------

/// Action as written in a trigger config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Handler id.
    pub handler: String,
    /// Parameter bag.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Execution mode, `sync` or `fire_and_forget`.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[allow(clippy::cast_possible_truncation)]
const fn default_timeout_ms() -> u64 {
    DEFAULT_ACTION_TIMEOUT.as_millis() as u64
}

/// Trigger as written in a trigger config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    /// Unique id.
    #[serde(alias = "id")]
    pub trigger_id: String,
    /// Display name; defaults to the id.
    #[serde(default)]
    pub name: String,
    /// Decision tier.
    pub layer: Layer,
    /// Order within the layer.
    #[serde(default)]
    pub priority: i32,
    /// Condition tree.
    pub condition: Condition,
    /// Action to run.
    pub action: ActionDefinition,
    /// Cooldown in milliseconds.
    #[serde(default)]
    pub cooldown_ms: u64,
    /// Whether the trigger starts enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Free-text description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Free-form labels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

const fn default_enabled() -> bool {
    true
}

impl TriggerDefinition {
    /// Build the runtime trigger.
    pub fn into_trigger(self) -> Trigger {
        let name = if self.name.is_empty() {
            self.trigger_id.clone()
        } else {
            self.name
        };
        let params = if self.action.params.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.action.params
        };
        Trigger {
            id: self.trigger_id,
            name,
            layer: self.layer,
            priority: self.priority,
            condition: self.condition,
            action: Action {
                handler: self.action.handler,
                params,
                mode: self.action.mode,
                timeout: Duration::from_millis(self.action.timeout_ms),
            },
            cooldown: Duration::from_millis(self.cooldown_ms),
            enabled: self.enabled,
            description: self.description,
            tags: self.tags,
        }
    }
}

/// Top-level shape of a trigger config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerFile {
    /// All trigger definitions.
    #[serde(default)]
    pub triggers: Vec<TriggerDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Operator;

    #[test]
    fn definition_defaults() {
        let json = serde_json::json!({
            "trigger_id": "heal",
            "layer": "REFLEX",
            "condition": {"type": "simple", "field": "hp_percent", "operator": "<=", "value": 25},
            "action": {"handler": "emergency_heal"}
        });
        let def: TriggerDefinition = serde_json::from_value(json)
            .unwrap_or_else(|e| panic!("definition should parse: {e}"));
        let trigger = def.into_trigger();
        assert_eq!(trigger.name, "heal");
        assert_eq!(trigger.layer, Layer::Reflex);
        assert_eq!(trigger.priority, 0);
        assert!(trigger.enabled);
        assert_eq!(trigger.cooldown, Duration::ZERO);
        assert_eq!(trigger.action.timeout, DEFAULT_ACTION_TIMEOUT);
        assert_eq!(trigger.action.mode, ExecutionMode::Sync);
        assert!(trigger.action.params.is_object());
    }

    #[test]
    fn definition_round_trips_through_trigger() {
        let trigger = Trigger::new(
            "flee",
            Layer::Tactical,
            3,
            Condition::simple("monsters.targeting_count", Operator::Ge, 3.0),
            Action::new("kite")
                .with_mode(ExecutionMode::FireAndForget)
                .with_timeout(Duration::from_millis(40)),
        )
        .with_cooldown(Duration::from_secs(2));

        let back = trigger.to_definition().into_trigger();
        assert_eq!(back, trigger);
    }
}
