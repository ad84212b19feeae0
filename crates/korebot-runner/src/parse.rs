//! Reasoning reply parsing.
//!
//! The provider returns raw text, ideally a JSON object
//! `{"action": .., "params": {..}, "reason": ..}`. Malformed replies are
//! handled gracefully: a reply that cannot be recovered yields no action.

use serde_json::Value;
use tracing::warn;

use crate::error::RunnerError;

/// The parsed suggestion from a reasoning reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningReply {
    /// Suggested handler id, if any.
    pub action: Option<String>,
    /// Parameters for the handler; always an object.
    pub params: Value,
    /// The provider's justification.
    pub reason: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct RawReply {
    #[serde(default, alias = "action_type")]
    action: Option<String>,
    #[serde(default, alias = "parameters")]
    params: Value,
    #[serde(default, alias = "reasoning")]
    reason: Option<String>,
}

/// Parse a reply string into a [`ReasoningReply`].
///
/// Recovery strategies, in order:
/// 1. Direct `serde_json` deserialization
/// 2. Extract JSON from a markdown code block
/// 3. Strip trailing commas and retry
/// 4. Both of the above
pub fn parse_reasoning_reply(raw: &str) -> ReasoningReply {
    match try_parse(raw) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, raw_response = raw, "failed to parse reasoning reply");
            ReasoningReply {
                action: None,
                params: Value::Object(serde_json::Map::new()),
                reason: Some("unparseable reasoning reply".to_owned()),
            }
        }
    }
}

fn try_parse(raw: &str) -> Result<ReasoningReply, RunnerError> {
    let trimmed = raw.trim();

    if let Ok(parsed) = serde_json::from_str::<RawReply>(trimmed) {
        return Ok(convert(parsed));
    }

    let block = extract_json_from_codeblock(trimmed);
    if let Some(json_str) = block
        && let Ok(parsed) = serde_json::from_str::<RawReply>(json_str)
    {
        return Ok(convert(parsed));
    }

    if let Ok(parsed) = serde_json::from_str::<RawReply>(&strip_trailing_commas(trimmed)) {
        return Ok(convert(parsed));
    }

    if let Some(json_str) = block
        && let Ok(parsed) = serde_json::from_str::<RawReply>(&strip_trailing_commas(json_str))
    {
        return Ok(convert(parsed));
    }

    Err(RunnerError::Parse(format!(
        "all parse strategies failed for: {trimmed}"
    )))
}

fn convert(raw: RawReply) -> ReasoningReply {
    let action = raw
        .action
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty() && a != "none" && a != "no_action");
    let params = match raw.params {
        Value::Object(map) => Value::Object(map),
        _ => Value::Object(serde_json::Map::new()),
    };
    ReasoningReply {
        action,
        params,
        reason: raw.reason,
    }
}

/// Body of the first fenced code block, preferring a `json` tagged one.
fn extract_json_from_codeblock(text: &str) -> Option<&str> {
    let body_start = |tag: &str| {
        text.find(tag).map(|i| {
            let after_tag = i.saturating_add(tag.len());
            text.get(after_tag..)
                .and_then(|s| s.find('\n'))
                .and_then(|nl| after_tag.checked_add(nl))
                .and_then(|pos| pos.checked_add(1))
                .unwrap_or(after_tag)
        })
    };
    let start = body_start("```json").or_else(|| body_start("```"))?;
    let remaining = text.get(start..)?;
    let end = remaining.find("```")?;
    remaining.get(..end).map(str::trim)
}

/// Strip trailing commas before closing braces and brackets.
fn strip_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ',' {
            let rest = chars.clone().find(|n| !n.is_whitespace());
            if matches!(rest, Some('}' | ']')) {
                continue;
            }
        }
        result.push(c);
    }
    result
}
