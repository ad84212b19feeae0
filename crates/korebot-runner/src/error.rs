//! Error types for the agent runner.
//!
//! Uses `thiserror` for typed errors that surface through the runner
//! pipeline: provider calls, prompt rendering, reply parsing, config and
//! the stdin/stdout loop.

use core::fmt;

/// One provider's reason for not answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// Provider name.
    pub provider: String,
    /// What went wrong.
    pub reason: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// Errors that can occur during runner operation.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A provider has no credentials or was probed unavailable.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Every provider in the chain failed or was unavailable.
    #[error("all reasoning providers failed: {}", join_failures(.0))]
    AllProvidersFailed(Vec<ProviderFailure>),

    /// A provider returned an error or was unreachable.
    #[error("LLM backend error: {0}")]
    LlmBackend(String),

    /// Failed to render a prompt template.
    #[error("template render error: {0}")]
    Template(String),

    /// A reasoning reply could not be parsed.
    #[error("response parse error: {0}")]
    Parse(String),

    /// Configuration is invalid or missing.
    #[error("config error: {0}")]
    Config(String),

    /// Trigger or tuning config could not be loaded.
    #[error("trigger config error: {0}")]
    TriggerConfig(#[from] korebot_core::error::ConfigError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no providers configured".to_owned();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
