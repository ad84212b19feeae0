//! Reasoning-layer action handlers.
//!
//! `request_reasoning` submits the current snapshot to the provider chain
//! in the background; `follow_reasoning` turns the cached memo into a
//! command on a later tick.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use korebot_core::{ActionHandler, HandlerContext, HandlerTable};

use crate::reasoning::ReasoningScheduler;

/// Add the reasoning handlers to `table`.
pub fn with_reasoning_handlers(table: HandlerTable, scheduler: &Arc<ReasoningScheduler>) -> HandlerTable {
    table
        .with(
            "request_reasoning",
            Arc::new(RequestReasoning::new(Arc::clone(scheduler))),
        )
        .with("follow_reasoning", Arc::new(FollowReasoning))
}

/// Submits a reasoning request unless one is already outstanding.
#[derive(Debug)]
pub struct RequestReasoning {
    scheduler: Arc<ReasoningScheduler>,
}

impl RequestReasoning {
    /// Create the handler.
    pub const fn new(scheduler: Arc<ReasoningScheduler>) -> Self {
        Self { scheduler }
    }
}

#[async_trait]
impl ActionHandler for RequestReasoning {
    async fn handle(&self, ctx: HandlerContext) -> Result<Value, String> {
        let requested = self.scheduler.request(&ctx.snapshot);
        Ok(json!({ "reasoning_requested": requested }))
    }
}

/// Acts on the memo attached to the snapshot.
///
/// The command is the memo's `params.command`, else the suggested action
/// name. Params: `max_age_ticks` rejects memos older than that.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowReasoning;

#[async_trait]
impl ActionHandler for FollowReasoning {
    async fn handle(&self, ctx: HandlerContext) -> Result<Value, String> {
        let memo = ctx
            .snapshot
            .reasoning
            .as_ref()
            .ok_or_else(|| "no reasoning available".to_owned())?;
        let action = memo
            .action
            .as_deref()
            .ok_or_else(|| "no reasoning available".to_owned())?;

        let age = ctx.snapshot.tick.saturating_sub(memo.completed_tick);
        if let Some(max_age) = ctx.params.get("max_age_ticks").and_then(Value::as_u64)
            && age > max_age
        {
            return Err(format!("reasoning memo is {age} ticks old (max {max_age})"));
        }

        let command = memo
            .params
            .get("command")
            .and_then(Value::as_str)
            .unwrap_or(action);
        Ok(json!({
            "command": command,
            "action": action,
            "params": memo.params,
            "provider": memo.provider,
            "reason": memo.reason,
            "late": memo.late,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::tests::{MockProvider, Reply};
    use crate::reasoning::tests::{scheduler, snapshot};
    use korebot_types::ReasoningMemo;
    use std::time::Duration;

    fn memo(action: Option<&str>, params: Value, completed_tick: u64) -> ReasoningMemo {
        ReasoningMemo {
            provider: "DeepSeek".to_owned(),
            model: "deepseek-chat".to_owned(),
            action: action.map(str::to_owned),
            params,
            reason: Some("inventory full".to_owned()),
            requested_tick: 1,
            completed_tick,
            late: false,
        }
    }

    fn ctx(tick: u64, memo: Option<ReasoningMemo>, params: Value) -> HandlerContext {
        HandlerContext {
            trigger_id: "follow".to_owned(),
            params,
            snapshot: Arc::new(snapshot(tick).with_reasoning(memo)),
        }
    }

    #[tokio::test]
    async fn follow_uses_command_param() {
        let m = memo(Some("command"), json!({ "command": "autosell" }), 9);
        let out = FollowReasoning
            .handle(ctx(10, Some(m), json!({})))
            .await
            .unwrap_or_default();
        assert_eq!(out["command"], "autosell");
        assert_eq!(out["provider"], "DeepSeek");
    }

    #[tokio::test]
    async fn follow_falls_back_to_action_name() {
        let m = memo(Some("sit"), json!({}), 9);
        let out = FollowReasoning
            .handle(ctx(10, Some(m), json!({})))
            .await
            .unwrap_or_default();
        assert_eq!(out["command"], "sit");
    }

    #[tokio::test]
    async fn follow_without_memo_or_action_fails() {
        let none = FollowReasoning.handle(ctx(10, None, json!({}))).await;
        assert_eq!(none, Err("no reasoning available".to_owned()));

        let empty = memo(None, json!({}), 9);
        let out = FollowReasoning.handle(ctx(10, Some(empty), json!({}))).await;
        assert!(out.is_err());
    }

    #[tokio::test]
    async fn follow_rejects_stale_memo() {
        let m = memo(Some("sit"), json!({}), 2);
        let out = FollowReasoning
            .handle(ctx(10, Some(m), json!({ "max_age_ticks": 5 })))
            .await;
        assert!(out.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn request_reports_whether_submitted() {
        let provider = MockProvider::new("OpenAI", 1, true, Reply::Hang);
        let scheduler = Arc::new(scheduler(vec![Arc::new(provider)], Duration::from_secs(30)).await);
        let handler = RequestReasoning::new(scheduler);

        let first = handler.handle(ctx(1, None, json!({}))).await.unwrap_or_default();
        assert_eq!(first["reasoning_requested"], true);
        let second = handler.handle(ctx(2, None, json!({}))).await.unwrap_or_default();
        assert_eq!(second["reasoning_requested"], false);
    }
}
