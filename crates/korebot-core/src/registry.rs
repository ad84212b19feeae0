//! The trigger registry: single source of truth for trigger definitions and
//! their runtime state.
//!
//! Definitions are stored as `Arc<Trigger>` in ascending priority order.
//! Equal priorities keep insertion order, so a layer query is a stable
//! filter over one pre-sorted list. Runtime state (enabled flag, last fired
//! instant, execution counters) sits next to it under the same lock.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use korebot_types::Layer;

use crate::error::{ConfigError, MalformedConfigEntry, RegistryError};
use crate::trigger::{Trigger, TriggerDefinition, TriggerFile};

/// Mutable per-trigger state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerRuntime {
    /// Whether the trigger takes part in evaluation.
    pub enabled: bool,
    /// When the trigger last fired (condition matched).
    pub last_fired: Option<Instant>,
    /// Times the trigger fired.
    pub execution_count: u64,
    /// Fired actions that succeeded.
    pub success_count: u64,
    /// Fired actions that failed.
    pub failure_count: u64,
}

impl TriggerRuntime {
    /// Whether `cooldown` has elapsed since the last firing.
    pub fn cooldown_elapsed(&self, cooldown: std::time::Duration, now: Instant) -> bool {
        self.last_fired
            .is_none_or(|at| now.saturating_duration_since(at) >= cooldown)
    }
}

/// Aggregate registry counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStatistics {
    /// Registered triggers.
    pub total_triggers: usize,
    /// Triggers currently enabled.
    pub enabled_triggers: usize,
    /// Registered triggers per layer.
    pub per_layer: BTreeMap<Layer, usize>,
    /// Sum of execution counts.
    pub total_executions: u64,
    /// Sum of success counts.
    pub total_successes: u64,
    /// Sum of failure counts.
    pub total_failures: u64,
}

/// Outcome of loading a trigger config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Entries registered.
    pub loaded: usize,
    /// Entries skipped.
    pub skipped: usize,
    /// Why each skipped entry was rejected.
    pub errors: Vec<MalformedConfigEntry>,
}

/// Serialization format of a trigger config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON document.
    Json,
    /// YAML document.
    Yaml,
}

impl ConfigFormat {
    /// `.json` files are JSON; everything else is read as YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    triggers: Vec<Arc<Trigger>>,
    runtime: HashMap<String, TriggerRuntime>,
}

impl RegistryInner {
    fn runtime_mut(&mut self, id: &str) -> Result<&mut TriggerRuntime, RegistryError> {
        self.runtime
            .get_mut(id)
            .ok_or_else(|| RegistryError::TriggerNotFound(id.to_owned()))
    }

    fn is_enabled(&self, id: &str) -> bool {
        self.runtime.get(id).is_some_and(|r| r.enabled)
    }
}

/// Registry of triggers, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct TriggerRegistry {
    inner: RwLock<RegistryInner>,
}

impl TriggerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTriggerId`] if the id is taken.
    pub async fn register(&self, trigger: Trigger) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.runtime.contains_key(&trigger.id) {
            return Err(RegistryError::DuplicateTriggerId(trigger.id));
        }
        let runtime = TriggerRuntime {
            enabled: trigger.enabled,
            ..TriggerRuntime::default()
        };
        inner.runtime.insert(trigger.id.clone(), runtime);
        let at = inner.triggers.partition_point(|t| t.priority <= trigger.priority);
        info!(
            trigger_id = %trigger.id,
            layer = %trigger.layer,
            priority = trigger.priority,
            "registered trigger"
        );
        inner.triggers.insert(at, Arc::new(trigger));
        Ok(())
    }

    /// Enabled triggers of one layer, ascending priority.
    pub async fn get_triggers_for_layer(&self, layer: Layer) -> Vec<Arc<Trigger>> {
        let inner = self.inner.read().await;
        inner
            .triggers
            .iter()
            .filter(|t| t.layer == layer && inner.is_enabled(&t.id))
            .cloned()
            .collect()
    }

    /// Enabled triggers of one layer whose cooldown has elapsed at `now`,
    /// ascending priority.
    pub async fn ready_triggers(&self, layer: Layer, now: Instant) -> Vec<Arc<Trigger>> {
        let inner = self.inner.read().await;
        inner
            .triggers
            .iter()
            .filter(|t| t.layer == layer)
            .filter(|t| {
                inner
                    .runtime
                    .get(&t.id)
                    .is_some_and(|r| r.enabled && r.cooldown_elapsed(t.cooldown, now))
            })
            .cloned()
            .collect()
    }

    /// Look up a trigger by id.
    pub async fn get_trigger(&self, id: &str) -> Option<Arc<Trigger>> {
        let inner = self.inner.read().await;
        inner.triggers.iter().find(|t| t.id == id).cloned()
    }

    /// Runtime state of a trigger.
    pub async fn runtime(&self, id: &str) -> Option<TriggerRuntime> {
        self.inner.read().await.runtime.get(id).cloned()
    }

    /// Whether the trigger exists and its cooldown has elapsed at `now`.
    pub async fn cooldown_ready(&self, id: &str, now: Instant) -> bool {
        let inner = self.inner.read().await;
        let Some(trigger) = inner.triggers.iter().find(|t| t.id == id) else {
            return false;
        };
        inner
            .runtime
            .get(id)
            .is_some_and(|r| r.cooldown_elapsed(trigger.cooldown, now))
    }

    /// Enable a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TriggerNotFound`] for an unknown id.
    pub async fn enable_trigger(&self, id: &str) -> Result<(), RegistryError> {
        self.inner.write().await.runtime_mut(id)?.enabled = true;
        info!(trigger_id = %id, "trigger enabled");
        Ok(())
    }

    /// Disable a trigger. Disabled triggers are never evaluated.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TriggerNotFound`] for an unknown id.
    pub async fn disable_trigger(&self, id: &str) -> Result<(), RegistryError> {
        self.inner.write().await.runtime_mut(id)?.enabled = false;
        info!(trigger_id = %id, "trigger disabled");
        Ok(())
    }

    /// Stamp a firing: starts the cooldown window and counts an execution.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TriggerNotFound`] for an unknown id.
    pub async fn mark_fired(&self, id: &str, now: Instant) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let runtime = inner.runtime_mut(id)?;
        runtime.last_fired = Some(now);
        runtime.execution_count = runtime.execution_count.saturating_add(1);
        Ok(())
    }

    /// Record the outcome of a fired action.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::TriggerNotFound`] for an unknown id.
    pub async fn record_execution(&self, id: &str, success: bool) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        let runtime = inner.runtime_mut(id)?;
        if success {
            runtime.success_count = runtime.success_count.saturating_add(1);
        } else {
            runtime.failure_count = runtime.failure_count.saturating_add(1);
        }
        Ok(())
    }

    /// Aggregate counters.
    pub async fn statistics(&self) -> RegistryStatistics {
        let inner = self.inner.read().await;
        let mut stats = RegistryStatistics {
            total_triggers: inner.triggers.len(),
            ..RegistryStatistics::default()
        };
        for trigger in &inner.triggers {
            let slot = stats.per_layer.entry(trigger.layer).or_insert(0);
            *slot = slot.saturating_add(1);
        }
        for runtime in inner.runtime.values() {
            if runtime.enabled {
                stats.enabled_triggers = stats.enabled_triggers.saturating_add(1);
            }
            stats.total_executions = stats.total_executions.saturating_add(runtime.execution_count);
            stats.total_successes = stats.total_successes.saturating_add(runtime.success_count);
            stats.total_failures = stats.total_failures.saturating_add(runtime.failure_count);
        }
        stats
    }

    /// Number of registered triggers.
    pub async fn len(&self) -> usize {
        self.inner.read().await.triggers.len()
    }

    /// Whether no triggers are registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.triggers.is_empty()
    }

    /// Remove every trigger.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.triggers.clear();
        inner.runtime.clear();
    }

    /// Serialize every trigger in registry order, with current enabled flags.
    pub async fn to_config(&self) -> TriggerFile {
        let inner = self.inner.read().await;
        let triggers = inner
            .triggers
            .iter()
            .map(|t| {
                let mut def = t.to_definition();
                def.enabled = inner.is_enabled(&t.id);
                def
            })
            .collect();
        TriggerFile { triggers }
    }

    // -----------------------------------------------------------------------
    // Config loading
    // -----------------------------------------------------------------------

    /// Load triggers from a JSON or YAML file.
    ///
    /// Malformed entries and duplicate ids are skipped and listed in the
    /// report; only an unreadable or unparseable document is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub async fn load_from_config(&self, path: &Path) -> Result<LoadReport, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let report = self
            .load_from_str(&content, ConfigFormat::from_path(path))
            .await?;
        info!(
            path = %path.display(),
            loaded = report.loaded,
            skipped = report.skipped,
            "loaded trigger config"
        );
        Ok(report)
    }

    /// Load triggers from an in-memory document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the document cannot be parsed or has no
    /// trigger list.
    pub async fn load_from_str(
        &self,
        content: &str,
        format: ConfigFormat,
    ) -> Result<LoadReport, ConfigError> {
        let document: serde_json::Value = match format {
            ConfigFormat::Json => serde_json::from_str(content)?,
            ConfigFormat::Yaml => serde_yml::from_str(content)?,
        };
        let entries = match document {
            serde_json::Value::Array(entries) => entries,
            serde_json::Value::Object(mut map) => match map.remove("triggers") {
                Some(serde_json::Value::Array(entries)) => entries,
                _ => return Err(ConfigError::Shape),
            },
            _ => return Err(ConfigError::Shape),
        };

        let mut report = LoadReport::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let id = entry
                .get("trigger_id")
                .or_else(|| entry.get("id"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned);

            let outcome = match serde_json::from_value::<TriggerDefinition>(entry) {
                Ok(def) => self
                    .register(def.into_trigger())
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(()) => report.loaded = report.loaded.saturating_add(1),
                Err(reason) => {
                    let skipped = MalformedConfigEntry { index, id, reason };
                    warn!(error = %skipped, "skipping trigger config entry");
                    report.skipped = report.skipped.saturating_add(1);
                    report.errors.push(skipped);
                }
            }
        }
        Ok(report)
    }
}
