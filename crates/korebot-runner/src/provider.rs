//! Reasoning providers.
//!
//! A [`ReasoningProvider`] sends a rendered prompt to a remote model and
//! returns the reply text. Concrete implementations exist for
//! `OpenAI`-compatible chat completion APIs (`DeepSeek`, `OpenAI`) and the
//! Anthropic Messages API, both over HTTP via `reqwest`.
//!
//! Providers do not care which model is behind the API; they send a prompt
//! and expect a text response containing JSON.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{BackendType, ProviderConfig, RunnerConfig};
use crate::error::RunnerError;
use crate::prompt::RenderedPrompt;

/// Messages API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Reply length cap sent with every request.
const MAX_TOKENS: u32 = 512;

/// A remote reasoning backend in the provider chain.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    /// Display name.
    fn name(&self) -> &str;

    /// Rank in the chain; lower is tried first.
    fn priority(&self) -> u8;

    /// Model identifier.
    fn model(&self) -> &str;

    /// Probe whether the provider can be used. Must not hit the network.
    async fn check_availability(&self) -> bool;

    /// Send a prompt and return the reply text.
    async fn query(&self, prompt: &RenderedPrompt) -> Result<String, RunnerError>;
}

/// Build one provider per configured entry.
pub fn build_providers(config: &RunnerConfig) -> Vec<Arc<dyn ReasoningProvider>> {
    config
        .providers
        .iter()
        .map(|p| -> Arc<dyn ReasoningProvider> {
            match p.backend_type {
                BackendType::OpenAi => Arc::new(OpenAiCompatible::new(p)),
                BackendType::Anthropic => Arc::new(Anthropic::new(p)),
            }
        })
        .collect()
}

/// Send a JSON request and decode the JSON reply.
///
/// Transport failures, non-success statuses and undecodable bodies all map
/// to [`RunnerError::LlmBackend`] tagged with the provider name.
async fn send_json(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, RunnerError> {
    let response = request
        .send()
        .await
        .map_err(|e| RunnerError::LlmBackend(format!("{provider} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let detail = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<unreadable body: {e}>"));
        return Err(RunnerError::LlmBackend(format!(
            "{provider} returned {status}: {detail}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| RunnerError::LlmBackend(format!("{provider} sent an undecodable reply: {e}")))
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// Provider for `OpenAI`-compatible chat completions APIs.
///
/// Sends requests to `{api_url}/chat/completions`.
pub struct OpenAiCompatible {
    client: reqwest::Client,
    name: String,
    priority: u8,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatible {
    /// Create a provider from its configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: config.name.clone(),
            priority: config.priority,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl ReasoningProvider for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        self.api_key.is_some()
    }

    async fn query(&self, prompt: &RenderedPrompt) -> Result<String, RunnerError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RunnerError::ProviderUnavailable(self.name.clone()))?;
        let url = format!("{}/chat/completions", self.api_url);

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": 0.7,
            "max_tokens": MAX_TOKENS,
            "response_format": {"type": "json_object"}
        });

        let request = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body);
        let json = send_json(&self.name, request).await?;

        extract_openai_content(&json)
    }
}

/// Extract the text content from a chat completions response.
fn extract_openai_content(json: &serde_json::Value) -> Result<String, RunnerError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            RunnerError::LlmBackend("response missing choices[0].message.content".to_owned())
        })
}

// ---------------------------------------------------------------------------
// Anthropic Messages API
// ---------------------------------------------------------------------------

/// Provider for the Anthropic Messages API.
///
/// Differs from the chat completions format:
/// - `x-api-key` header instead of `Authorization: Bearer`
/// - the system prompt is a top-level field
/// - the reply lives at `content[0].text`
pub struct Anthropic {
    client: reqwest::Client,
    name: String,
    priority: u8,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl Anthropic {
    /// Create a provider from its configuration.
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            name: config.name.clone(),
            priority: config.priority,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl ReasoningProvider for Anthropic {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn check_availability(&self) -> bool {
        self.api_key.is_some()
    }

    async fn query(&self, prompt: &RenderedPrompt) -> Result<String, RunnerError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RunnerError::ProviderUnavailable(self.name.clone()))?;
        let url = format!("{}/messages", self.api_url);

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": prompt.system,
            "messages": [
                {"role": "user", "content": prompt.user}
            ]
        });

        let request = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);
        let json = send_json(&self.name, request).await?;

        extract_anthropic_content(&json)
    }
}

/// Extract the text content from a Messages API response.
fn extract_anthropic_content(json: &serde_json::Value) -> Result<String, RunnerError> {
    json.get("content")
        .and_then(|c| c.get(0))
        .and_then(|b| b.get("text"))
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned)
        .ok_or_else(|| RunnerError::LlmBackend("response missing content[0].text".to_owned()))
}
