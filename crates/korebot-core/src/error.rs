//! Error types for the decision engine.
//!
//! Condition resolution misses are deliberately absent: an unknown or empty
//! field makes a condition evaluate to `false`, it is never an error.

use std::time::Duration;

/// Errors from trigger registry mutations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A trigger with this id is already registered.
    #[error("duplicate trigger id: {0}")]
    DuplicateTriggerId(String),

    /// No trigger with this id is registered.
    #[error("trigger not found: {0}")]
    TriggerNotFound(String),
}

/// Errors raised while running an action handler.
///
/// These never abort a tick; the coordinator records them and moves on.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ActionError {
    /// The action names a handler id that is not in the handler table.
    #[error("handler not found: {0}")]
    HandlerNotFound(String),

    /// A sync handler did not finish within its timeout.
    #[error("timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The handler returned an error or panicked.
    #[error("handler error: {0}")]
    Exception(String),
}

/// Errors that stop a configuration file from loading at all.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse JSON content.
    #[error("failed to parse config JSON: {source}")]
    Json {
        /// The underlying JSON parse error.
        #[from]
        source: serde_json::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The document parsed but has no trigger list.
    #[error("expected a list of triggers or a `triggers` key")]
    Shape,
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// A single trigger entry in a config file that was skipped.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("malformed trigger entry #{index} ({}): {reason}", .id.as_deref().unwrap_or("<no id>"))]
pub struct MalformedConfigEntry {
    /// Zero-based position of the entry in the file.
    pub index: usize,
    /// The entry's `trigger_id`, when it had one.
    pub id: Option<String>,
    /// Why the entry was rejected.
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_uses_millis() {
        let err = ActionError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "timeout after 250ms");
    }

    #[test]
    fn malformed_entry_without_id() {
        let err = MalformedConfigEntry {
            index: 3,
            id: None,
            reason: "missing field `layer`".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "malformed trigger entry #3 (<no id>): missing field `layer`"
        );
    }
}
