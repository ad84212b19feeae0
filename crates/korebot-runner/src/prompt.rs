//! Prompt template loading and rendering via `minijinja`.
//!
//! Templates are loaded from a directory when one is configured, so
//! operators can tune the reasoning prompt without recompiling. Otherwise
//! the templates shipped with the crate are used. Both `system.j2` and
//! `user.j2` are rendered over the snapshot serialized to JSON, plus the
//! list of actions the reasoning layer may suggest.

use std::path::Path;

use minijinja::{Environment, path_loader};
use serde_json::Value;

use korebot_types::StateSnapshot;

use crate::error::RunnerError;

const SYSTEM_TEMPLATE: &str = "system.j2";
const USER_TEMPLATE: &str = "user.j2";

/// The rendered prompt ready to send to a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    /// System message.
    pub system: String,
    /// User message describing the situation.
    pub user: String,
}

/// Manages prompt template loading and rendering.
#[derive(Debug)]
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    /// Load templates from `templates_dir`, or use the built-in ones.
    ///
    /// Directory templates are checked eagerly so a missing file fails at
    /// startup rather than on the first reasoning request.
    pub fn new(templates_dir: Option<&Path>) -> Result<Self, RunnerError> {
        let mut env = Environment::new();
        match templates_dir {
            Some(dir) => {
                env.set_loader(path_loader(dir));
                for name in [SYSTEM_TEMPLATE, USER_TEMPLATE] {
                    env.get_template(name).map_err(|e| {
                        RunnerError::Template(format!(
                            "failed to load {name} from {}: {e}",
                            dir.display()
                        ))
                    })?;
                }
            }
            None => {
                env.add_template(SYSTEM_TEMPLATE, include_str!("../templates/system.j2"))
                    .map_err(|e| RunnerError::Template(format!("built-in system template: {e}")))?;
                env.add_template(USER_TEMPLATE, include_str!("../templates/user.j2"))
                    .map_err(|e| RunnerError::Template(format!("built-in user template: {e}")))?;
            }
        }
        Ok(Self { env })
    }

    /// Render the prompt for `snapshot`, offering `actions` as choices.
    pub fn render(
        &self,
        snapshot: &StateSnapshot,
        actions: &[String],
    ) -> Result<RenderedPrompt, RunnerError> {
        let mut context = serde_json::to_value(snapshot)?;
        if let Value::Object(map) = &mut context {
            map.insert("actions".to_owned(), serde_json::to_value(actions)?);
        }
        Ok(RenderedPrompt {
            system: self.render_one(SYSTEM_TEMPLATE, &context)?,
            user: self.render_one(USER_TEMPLATE, &context)?,
        })
    }

    fn render_one(&self, name: &str, context: &Value) -> Result<String, RunnerError> {
        self.env
            .get_template(name)
            .map_err(|e| RunnerError::Template(format!("missing {name}: {e}")))?
            .render(context)
            .map_err(|e| RunnerError::Template(format!("{name} render failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> StateSnapshot {
        let value = serde_json::json!({
            "tick": 42,
            "character": {
                "name": "Luna", "job_class": "Hunter", "level": 61,
                "hp": 800, "max_hp": 1000, "map": "gef_fild10",
                "position": { "x": 120, "y": 88 },
                "status_effects": ["blessing"]
            },
            "monsters": [
                { "id": 5, "name": "Orc Warrior", "level": 44,
                  "position": { "x": 125, "y": 90 }, "targeting_us": true }
            ],
            "inventory": [{ "item_id": 501, "name": "Red Potion", "amount": 12 }]
        });
        serde_json::from_value(value).unwrap_or_else(|e| panic!("bad snapshot: {e}"))
    }

    #[test]
    fn builtin_templates_render_snapshot() {
        let engine = PromptEngine::new(None).unwrap_or_else(|e| panic!("{e}"));
        let prompt = engine
            .render(&snapshot(), &["command".to_owned(), "select_target".to_owned()])
            .unwrap_or_else(|e| panic!("{e}"));
        assert!(prompt.system.contains("Luna"));
        assert!(prompt.system.contains("Hunter"));
        assert!(prompt.user.contains("tick 42"));
        assert!(prompt.user.contains("Orc Warrior"));
        assert!(prompt.user.contains("[attacking us]"));
        assert!(prompt.user.contains("Red Potion x12"));
        assert!(prompt.user.contains("- select_target"));
        assert!(prompt.user.contains("blessing"));
    }

    #[test]
    fn directory_templates_override_builtins() {
        let dir = std::env::temp_dir().join(format!(
            "korebot_templates_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        ));
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join(SYSTEM_TEMPLATE), "sys {{ character.name }}").ok();
        std::fs::write(dir.join(USER_TEMPLATE), "{{ actions | length }} actions").ok();

        let engine = PromptEngine::new(Some(dir.as_path())).unwrap_or_else(|e| panic!("{e}"));
        let prompt = engine
            .render(&snapshot(), &["command".to_owned()])
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(prompt.system, "sys Luna");
        assert_eq!(prompt.user, "1 actions");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_directory_template_is_an_error() {
        let dir = std::env::temp_dir().join(format!(
            "korebot_missing_templates_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        ));
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join(SYSTEM_TEMPLATE), "only system").ok();

        let result = PromptEngine::new(Some(dir.as_path()));
        assert!(matches!(result, Err(RunnerError::Template(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
