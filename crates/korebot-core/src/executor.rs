//! Action execution.
//!
//! Handlers are trait objects registered by id in a [`HandlerTable`] at
//! startup. The [`TriggerExecutor`] looks up the handler a trigger's action
//! names and runs it in the action's execution mode:
//!
//! - `sync`: the handler runs on its own task and the executor waits up to
//!   the action timeout, capped by the tick deadline when one is given. On
//!   expiry, or when the caller drops the wait, the task is aborted.
//! - `fire_and_forget`: the handler is spawned and the executor reports
//!   success at once; the eventual outcome is only logged.
//!
//! Every failure is reported in the [`ExecutionResult`]; nothing here panics
//! or propagates an error to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};
use tracing::{debug, warn};

use korebot_types::{ExecutionMode, StateSnapshot};

use crate::error::ActionError;
use crate::trigger::Trigger;

/// Shortest wait a sync action gets once the tick deadline has passed.
pub const MIN_ACTION_BUDGET: Duration = Duration::from_millis(10);

/// Everything a handler receives when its trigger fires.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Trigger that fired.
    pub trigger_id: String,
    /// The action's parameter bag.
    pub params: serde_json::Value,
    /// The snapshot the condition matched against.
    pub snapshot: Arc<StateSnapshot>,
}

impl HandlerContext {
    /// String parameter by key.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(serde_json::Value::as_str)
    }

    /// Numeric parameter by key.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(serde_json::Value::as_f64)
    }
}

/// A named piece of behavior a trigger can run.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Run the handler. The returned JSON becomes the decision payload;
    /// an `Err` is reported as an action exception.
    async fn handle(&self, ctx: HandlerContext) -> Result<serde_json::Value, String>;
}

/// Handler id to handler mapping, built once at startup.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `id`, replacing any previous one.
    pub fn register(&mut self, id: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(id.to_owned(), handler);
    }

    /// Builder-style [`HandlerTable::register`].
    #[must_use]
    pub fn with(mut self, id: &str, handler: Arc<dyn ActionHandler>) -> Self {
        self.register(id, handler);
        self
    }

    /// Look up a handler.
    pub fn get(&self, id: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn handler_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.handler_ids())
            .finish()
    }
}

/// Outcome of running one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// Whether the action counts as done.
    pub success: bool,
    /// Handler output, or a dispatch marker for fire-and-forget actions.
    pub payload: serde_json::Value,
    /// Time spent in the executor.
    pub execution_time: Duration,
    /// Failure reason, when `success` is false.
    pub error: Option<ActionError>,
}

impl ExecutionResult {
    fn ok(payload: serde_json::Value, started: Instant) -> Self {
        Self {
            success: true,
            payload,
            execution_time: started.elapsed(),
            error: None,
        }
    }

    fn failed(error: ActionError, started: Instant) -> Self {
        Self {
            success: false,
            payload: serde_json::Value::Null,
            execution_time: started.elapsed(),
            error: Some(error),
        }
    }
}

/// Executor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutorStatistics {
    /// Actions run.
    pub total_executions: u64,
    /// Total time spent running actions.
    pub total_execution_time: Duration,
    /// Mean time per action.
    pub average_execution_time: Duration,
    /// Handlers in the table.
    pub registered_handlers: usize,
}

#[derive(Debug, Default)]
struct ExecutorInner {
    total_executions: u64,
    total_execution_time: Duration,
}

/// Runs trigger actions through the handler table.
#[derive(Debug)]
pub struct TriggerExecutor {
    handlers: HandlerTable,
    inner: Mutex<ExecutorInner>,
}

impl TriggerExecutor {
    /// Create an executor over a fixed handler table.
    pub fn new(handlers: HandlerTable) -> Self {
        Self {
            handlers,
            inner: Mutex::new(ExecutorInner::default()),
        }
    }

    /// The handler table.
    pub const fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    /// Run the action of `trigger` against `snapshot`.
    pub async fn execute_action(
        &self,
        trigger: &Trigger,
        snapshot: Arc<StateSnapshot>,
    ) -> ExecutionResult {
        self.execute_action_before(trigger, snapshot, None).await
    }

    /// Run the action of `trigger`, waiting for a sync handler no later than
    /// `deadline`.
    ///
    /// The wait is `min(action timeout, time left)`, but never shorter than
    /// [`MIN_ACTION_BUDGET`] so a handler that answers at once can still be
    /// used after a slow one spent the budget.
    pub async fn execute_action_before(
        &self,
        trigger: &Trigger,
        snapshot: Arc<StateSnapshot>,
        deadline: Option<Instant>,
    ) -> ExecutionResult {
        let started = Instant::now();
        let action = &trigger.action;
        let limit = deadline.map_or(action.timeout, |d| {
            action
                .timeout
                .min(d.saturating_duration_since(started).max(MIN_ACTION_BUDGET))
        });

        let Some(handler) = self.handlers.get(&action.handler) else {
            warn!(trigger_id = %trigger.id, handler = %action.handler, "handler not found");
            let result = ExecutionResult::failed(
                ActionError::HandlerNotFound(action.handler.clone()),
                started,
            );
            self.record(result.execution_time);
            return result;
        };

        let ctx = HandlerContext {
            trigger_id: trigger.id.clone(),
            params: action.params.clone(),
            snapshot,
        };

        let result = match action.mode {
            ExecutionMode::Sync => run_sync(handler, ctx, limit, started).await,
            ExecutionMode::FireAndForget => {
                dispatch(handler, ctx, &action.handler);
                ExecutionResult::ok(json!({ "dispatched": true }), started)
            }
        };

        debug!(
            trigger_id = %trigger.id,
            handler = %action.handler,
            success = result.success,
            duration_us = u64::try_from(result.execution_time.as_micros()).unwrap_or(u64::MAX),
            "action executed"
        );
        if let Some(error) = &result.error {
            warn!(trigger_id = %trigger.id, handler = %action.handler, error = %error, "action failed");
        }

        self.record(result.execution_time);
        result
    }

    /// Counters since startup.
    pub fn statistics(&self) -> ExecutorStatistics {
        let Ok(inner) = self.inner.lock() else {
            return ExecutorStatistics::default();
        };
        let average = u32::try_from(inner.total_executions)
            .ok()
            .and_then(|n| inner.total_execution_time.checked_div(n))
            .unwrap_or_default();
        ExecutorStatistics {
            total_executions: inner.total_executions,
            total_execution_time: inner.total_execution_time,
            average_execution_time: average,
            registered_handlers: self.handlers.len(),
        }
    }

    fn record(&self, elapsed: Duration) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner.total_executions = inner.total_executions.saturating_add(1);
        inner.total_execution_time = inner.total_execution_time.saturating_add(elapsed);
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn run_sync(
    handler: Arc<dyn ActionHandler>,
    ctx: HandlerContext,
    limit: Duration,
    started: Instant,
) -> ExecutionResult {
    let mut task = AbortOnDrop(tokio::spawn(async move { handler.handle(ctx).await }));
    match timeout(limit, &mut task.0).await {
        Ok(Ok(Ok(payload))) => ExecutionResult::ok(payload, started),
        Ok(Ok(Err(message))) => ExecutionResult::failed(ActionError::Exception(message), started),
        Ok(Err(join_error)) => {
            ExecutionResult::failed(ActionError::Exception(join_error.to_string()), started)
        }
        Err(_elapsed) => ExecutionResult::failed(ActionError::Timeout(limit), started),
    }
}

fn dispatch(handler: Arc<dyn ActionHandler>, ctx: HandlerContext, handler_id: &str) {
    let handler_id = handler_id.to_owned();
    let trigger_id = ctx.trigger_id.clone();
    tokio::spawn(async move {
        match handler.handle(ctx).await {
            Ok(_) => debug!(trigger_id = %trigger_id, handler = %handler_id, "background action finished"),
            Err(e) => warn!(trigger_id = %trigger_id, handler = %handler_id, error = %e, "background action failed"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Condition;
    use crate::trigger::Action;
    use korebot_types::{CharacterState, Layer, Position};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        async fn handle(&self, ctx: HandlerContext) -> Result<serde_json::Value, String> {
            Ok(json!({ "echo": ctx.params, "hp": ctx.snapshot.character.hp }))
        }
    }

    struct Slow(Duration);

    #[async_trait]
    impl ActionHandler for Slow {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            tokio::time::sleep(self.0).await;
            Ok(serde_json::Value::Null)
        }
    }

    struct Failing;

    #[async_trait]
    impl ActionHandler for Failing {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            Err("out of potions".to_owned())
        }
    }

    struct Panicking;

    #[async_trait]
    impl ActionHandler for Panicking {
        #[allow(clippy::panic)]
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            panic!("handler blew up");
        }
    }

    struct Counting(Arc<AtomicUsize>);

    struct SlowCounting(Duration, Arc<AtomicUsize>);

    #[async_trait]
    impl ActionHandler for SlowCounting {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            tokio::time::sleep(self.0).await;
            self.1.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    }

    #[async_trait]
    impl ActionHandler for Counting {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::Value::Null)
        }
    }

    fn snapshot() -> Arc<StateSnapshot> {
        Arc::new(StateSnapshot {
            tick: 1,
            character: CharacterState {
                name: "Tester".to_owned(),
                job_class: "archer".to_owned(),
                level: 1,
                job_level: 1,
                hp: 77,
                max_hp: 100,
                sp: 10,
                max_sp: 10,
                map: String::new(),
                position: Position::new(0, 0),
                weight: 0,
                max_weight: 0,
                zeny: 0,
                attack: 0,
                matk: 0,
                aspd: 150,
                element: korebot_types::Element::Neutral,
                status_effects: Vec::new(),
            },
            monsters: Vec::new(),
            inventory: Vec::new(),
            nearby_players: Vec::new(),
            reasoning: None,
        })
    }

    fn trigger(action: Action) -> Trigger {
        Trigger::new("t", Layer::Reflex, 1, Condition::all(Vec::new()), action)
    }

    fn executor() -> TriggerExecutor {
        TriggerExecutor::new(
            HandlerTable::new()
                .with("echo", Arc::new(Echo))
                .with("slow", Arc::new(Slow(Duration::from_secs(10))))
                .with("failing", Arc::new(Failing))
                .with("panicking", Arc::new(Panicking)),
        )
    }

    #[tokio::test]
    async fn sync_success_returns_payload() {
        let action = Action::new("echo").with_params(json!({ "item": "White Potion" }));
        let result = executor().execute_action(&trigger(action), snapshot()).await;
        assert!(result.success);
        assert_eq!(result.payload["echo"]["item"], "White Potion");
        assert_eq!(result.payload["hp"], 77);
    }

    #[tokio::test]
    async fn unknown_handler_is_reported() {
        let result = executor()
            .execute_action(&trigger(Action::new("missing")), snapshot())
            .await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ActionError::HandlerNotFound("missing".to_owned())));
    }

    #[tokio::test(start_paused = true)]
    async fn sync_timeout_is_reported() {
        let action = Action::new("slow").with_timeout(Duration::from_millis(50));
        let result = executor().execute_action(&trigger(action), snapshot()).await;
        assert!(!result.success);
        assert_eq!(result.error, Some(ActionError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_caps_sync_timeout() {
        let action = Action::new("slow").with_timeout(Duration::from_secs(1));
        let deadline = Instant::now().checked_add(Duration::from_millis(50));
        let result = executor()
            .execute_action_before(&trigger(action), snapshot(), deadline)
            .await;
        assert_eq!(result.error, Some(ActionError::Timeout(Duration::from_millis(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn spent_deadline_leaves_minimum_budget() {
        let exec = executor();
        let past = Instant::now();
        tokio::time::advance(Duration::from_millis(5)).await;

        let slow = Action::new("slow").with_timeout(Duration::from_secs(1));
        let result = exec
            .execute_action_before(&trigger(slow), snapshot(), Some(past))
            .await;
        assert_eq!(result.error, Some(ActionError::Timeout(MIN_ACTION_BUDGET)));

        let quick = exec
            .execute_action_before(&trigger(Action::new("echo")), snapshot(), Some(past))
            .await;
        assert!(quick.success);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_aborts_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let exec = TriggerExecutor::new(HandlerTable::new().with(
            "slow",
            Arc::new(SlowCounting(Duration::from_millis(100), Arc::clone(&count))),
        ));
        let t = trigger(Action::new("slow"));
        let waited = timeout(Duration::from_millis(20), exec.execute_action(&t, snapshot())).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handler_error_is_exception() {
        let result = executor()
            .execute_action(&trigger(Action::new("failing")), snapshot())
            .await;
        assert_eq!(result.error, Some(ActionError::Exception("out of potions".to_owned())));
    }

    #[tokio::test]
    async fn handler_panic_is_exception() {
        let result = executor()
            .execute_action(&trigger(Action::new("panicking")), snapshot())
            .await;
        assert!(!result.success);
        assert!(matches!(result.error, Some(ActionError::Exception(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fire_and_forget_reports_success_immediately() {
        let action = Action::new("slow")
            .with_mode(ExecutionMode::FireAndForget)
            .with_timeout(Duration::from_millis(1));
        let result = executor().execute_action(&trigger(action), snapshot()).await;
        assert!(result.success);
        assert_eq!(result.payload, json!({ "dispatched": true }));
    }

    #[tokio::test]
    async fn fire_and_forget_still_runs_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let exec = TriggerExecutor::new(
            HandlerTable::new().with("count", Arc::new(Counting(Arc::clone(&count)))),
        );
        let action = Action::new("count").with_mode(ExecutionMode::FireAndForget);
        let _ = exec.execute_action(&trigger(action), snapshot()).await;
        for _ in 0..100 {
            if count.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn statistics_accumulate() {
        let exec = executor();
        let _ = exec.execute_action(&trigger(Action::new("echo")), snapshot()).await;
        let _ = exec.execute_action(&trigger(Action::new("missing")), snapshot()).await;
        let stats = exec.statistics();
        assert_eq!(stats.total_executions, 2);
        assert_eq!(stats.registered_handlers, 4);
    }
}
