//! Configuration types for the agent runner.
//!
//! All configuration is loaded from environment variables: where the trigger
//! and tuning files live, the tick and reasoning deadlines, and which
//! reasoning providers to use (with their URLs, API keys and models).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::RunnerError;

/// Complete runner configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Trigger config file (JSON or YAML). Built-in triggers when unset.
    pub triggers_path: Option<PathBuf>,
    /// Tuning tables (YAML). Built-in defaults when unset.
    pub tuning_path: Option<PathBuf>,
    /// Prompt template directory. Built-in templates when unset.
    pub templates_dir: Option<PathBuf>,
    /// Budget for one coordinator pass.
    pub tick_deadline: Duration,
    /// How long a reasoning request may stay outstanding.
    pub reasoning_deadline: Duration,
    /// Budget for a single provider call.
    pub provider_timeout: Duration,
    /// Reasoning providers, in priority order.
    pub providers: Vec<ProviderConfig>,
}

/// Configuration for a single reasoning provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Display name, also reported in the reasoning memo.
    pub name: String,
    /// Wire protocol.
    pub backend_type: BackendType,
    /// Rank in the chain; lower is tried first.
    pub priority: u8,
    /// Base API URL (e.g. `https://api.openai.com/v1`).
    pub api_url: String,
    /// API key; the provider is unavailable without one.
    pub api_key: Option<String>,
    /// Model identifier.
    pub model: String,
}

/// Supported provider wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// `OpenAI`-compatible chat completions (`OpenAI`, `DeepSeek`).
    OpenAi,
    /// Anthropic Messages API.
    Anthropic,
}

/// Built-in provider table: env prefix, name, protocol, URL, model.
const PROVIDERS: [(&str, &str, BackendType, &str, &str); 3] = [
    (
        "DEEPSEEK",
        "DeepSeek",
        BackendType::OpenAi,
        "https://api.deepseek.com/v1",
        "deepseek-chat",
    ),
    (
        "OPENAI",
        "OpenAI",
        BackendType::OpenAi,
        "https://api.openai.com/v1",
        "gpt-4-turbo-preview",
    ),
    (
        "ANTHROPIC",
        "Anthropic",
        BackendType::Anthropic,
        "https://api.anthropic.com/v1",
        "claude-3-opus-20240229",
    ),
];

impl RunnerConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional variables:
    /// - `KOREBOT_TRIGGERS` -- trigger config file
    /// - `KOREBOT_TUNING` -- tuning YAML file
    /// - `KOREBOT_TEMPLATES_DIR` -- prompt template directory
    /// - `TICK_DEADLINE_MS` -- coordinator budget per tick (default 50)
    /// - `REASONING_DEADLINE_MS` -- reasoning request deadline (default 30000)
    /// - `PROVIDER_TIMEOUT_MS` -- per-provider call timeout (default 20000)
    /// - `DEEPSEEK_API_KEY`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY` -- provider
    ///   credentials; `*_MODEL` and `*_API_URL` override the defaults
    pub fn from_env() -> Result<Self, RunnerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RunnerError> {
        let path = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(PathBuf::from);

        let providers = (1u8..)
            .zip(PROVIDERS)
            .map(|(priority, (prefix, name, backend_type, url, model))| ProviderConfig {
                name: name.to_owned(),
                backend_type,
                priority,
                api_url: lookup(&format!("{prefix}_API_URL")).unwrap_or_else(|| url.to_owned()),
                api_key: lookup(&format!("{prefix}_API_KEY")).filter(|k| !k.trim().is_empty()),
                model: lookup(&format!("{prefix}_MODEL")).unwrap_or_else(|| model.to_owned()),
            })
            .collect();

        Ok(Self {
            triggers_path: path("KOREBOT_TRIGGERS"),
            tuning_path: path("KOREBOT_TUNING"),
            templates_dir: path("KOREBOT_TEMPLATES_DIR"),
            tick_deadline: millis(&lookup, "TICK_DEADLINE_MS", 50)?,
            reasoning_deadline: millis(&lookup, "REASONING_DEADLINE_MS", 30_000)?,
            provider_timeout: millis(&lookup, "PROVIDER_TIMEOUT_MS", 20_000)?,
            providers,
        })
    }
}

/// Parse a millisecond duration variable, with a default.
fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
) -> Result<Duration, RunnerError> {
    let ms = match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| RunnerError::Config(format!("invalid {name}: {e}")))?,
        None => default,
    };
    Ok(Duration::from_millis(ms))
}
