//! Decision records emitted by the agent loop, one per tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::Layer;
use crate::ids::RequestId;

/// Why a tick produced no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoActionReason {
    /// No trigger matched, or every matched action failed.
    NoTrigger,
    /// The tick deadline expired before any layer fired.
    Deadline,
}

/// A trigger whose action failed during the tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Trigger that fired.
    pub trigger_id: String,
    /// Error message from the executor.
    pub error: String,
}

/// Outcome of one tick, written as a JSON line to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Unique id of this record.
    pub request_id: RequestId,
    /// Host tick that produced it.
    pub tick: u64,
    /// Layer that fired, if any.
    pub tier: Option<Layer>,
    /// Trigger that fired, if any.
    pub trigger_id: Option<String>,
    /// Handler that ran, if any.
    pub handler: Option<String>,
    /// Handler parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Handler result payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Set when nothing fired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_action: Option<NoActionReason>,
    /// Actions that failed before the winning one (or before giving up).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
    /// Wall time spent on the tick, in microseconds.
    pub latency_us: u64,
    /// When the record was emitted.
    pub emitted_at: DateTime<Utc>,
}

impl DecisionRecord {
    /// A record for a tick that produced no action.
    pub fn no_action(tick: u64, reason: NoActionReason, latency_us: u64) -> Self {
        Self {
            request_id: RequestId::new(),
            tick,
            tier: None,
            trigger_id: None,
            handler: None,
            params: serde_json::Value::Null,
            payload: serde_json::Value::Null,
            no_action: Some(reason),
            failures: Vec::new(),
            latency_us,
            emitted_at: Utc::now(),
        }
    }

    /// Whether an action was chosen.
    pub const fn is_action(&self) -> bool {
        self.tier.is_some()
    }
}
