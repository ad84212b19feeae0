//! The per-tick trigger coordinator.
//!
//! Walks the decision layers in fixed order (reflex, tactical, learned,
//! reasoning). Within a layer it asks the registry for enabled triggers that
//! are off cooldown, in priority order, and evaluates each condition. The
//! first matching trigger whose action succeeds ends the tick.
//!
//! A matching trigger's cooldown starts when its condition matches, before
//! its action runs, so a failing action is not retried every tick. Failed
//! actions are collected in the [`TickReport`] and evaluation continues.
//!
//! With a tick budget, sync actions are cut off at the budget and count as
//! timed-out failures, so lower layers are still consulted.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use korebot_types::{FailureRecord, Layer, StateSnapshot};

use crate::executor::TriggerExecutor;
use crate::registry::TriggerRegistry;

/// What the coordinator is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", content = "layer", rename_all = "snake_case")]
pub enum Phase {
    /// Between ticks, or the last tick produced nothing.
    #[default]
    Idle,
    /// Evaluating the given layer.
    Evaluating(Layer),
    /// The last tick fired on the given layer.
    Fired(Layer),
}

/// The action chosen for a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Trigger that fired.
    pub trigger_id: String,
    /// Its display name.
    pub trigger_name: String,
    /// Layer it belongs to.
    pub tier: Layer,
    /// Handler that ran.
    pub handler: String,
    /// Parameters the handler received.
    pub params: serde_json::Value,
    /// Handler result.
    pub payload: serde_json::Value,
    /// Time spent executing the action.
    pub execution_time: Duration,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A trigger fired and its action succeeded.
    Fired(Decision),
    /// No trigger produced a successful action.
    NoAction,
}

/// Everything that happened during one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Host tick number.
    pub tick: u64,
    /// Chosen action, if any.
    pub outcome: TickOutcome,
    /// Actions that fired but failed, in evaluation order.
    pub failures: Vec<FailureRecord>,
    /// Time spent in the coordinator.
    pub latency: Duration,
}

impl TickReport {
    /// The decision, when the tick fired.
    pub const fn decision(&self) -> Option<&Decision> {
        match &self.outcome {
            TickOutcome::Fired(decision) => Some(decision),
            TickOutcome::NoAction => None,
        }
    }
}

/// Coordinator counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatistics {
    /// Triggers whose condition was evaluated.
    pub total_checks: u64,
    /// Ticks that produced an action.
    pub total_fired: u64,
    /// Fired actions that failed.
    pub total_failures: u64,
    /// Successful firings per layer.
    pub per_layer: BTreeMap<Layer, u64>,
}

#[derive(Debug, Default)]
struct CoordinatorInner {
    phase: Phase,
    stats: CoordinatorStatistics,
}

/// Drives the registry and executor once per tick.
#[derive(Debug)]
pub struct TriggerCoordinator {
    registry: Arc<TriggerRegistry>,
    executor: Arc<TriggerExecutor>,
    inner: Mutex<CoordinatorInner>,
}

impl TriggerCoordinator {
    /// Create a coordinator over a registry and executor.
    pub fn new(registry: Arc<TriggerRegistry>, executor: Arc<TriggerExecutor>) -> Self {
        Self {
            registry,
            executor,
            inner: Mutex::new(CoordinatorInner::default()),
        }
    }

    /// The trigger registry.
    pub const fn registry(&self) -> &Arc<TriggerRegistry> {
        &self.registry
    }

    /// The action executor.
    pub const fn executor(&self) -> &Arc<TriggerExecutor> {
        &self.executor
    }

    /// Evaluate all layers against `snapshot` and run at most one action.
    pub async fn process_game_state(&self, snapshot: Arc<StateSnapshot>) -> TickReport {
        self.run_tick(snapshot, None).await
    }

    /// Like [`TriggerCoordinator::process_game_state`], but sync actions are
    /// cut off once `budget` from now is spent, see
    /// [`TriggerExecutor::execute_action_before`].
    pub async fn process_game_state_within(
        &self,
        snapshot: Arc<StateSnapshot>,
        budget: Duration,
    ) -> TickReport {
        let deadline = Instant::now().checked_add(budget);
        self.run_tick(snapshot, deadline).await
    }

    async fn run_tick(&self, snapshot: Arc<StateSnapshot>, deadline: Option<Instant>) -> TickReport {
        let started = Instant::now();
        let mut failures = Vec::new();
        let _reset = PhaseReset(&self.inner);

        for layer in Layer::ORDERED {
            self.update(|inner| inner.phase = Phase::Evaluating(layer));
            let candidates = self.registry.ready_triggers(layer, Instant::now()).await;

            for trigger in candidates {
                self.update(|inner| {
                    inner.stats.total_checks = inner.stats.total_checks.saturating_add(1);
                });
                if !trigger.condition.evaluate(&snapshot) {
                    continue;
                }

                if let Err(e) = self.registry.mark_fired(&trigger.id, Instant::now()).await {
                    warn!(trigger_id = %trigger.id, error = %e, "trigger vanished before firing");
                    continue;
                }
                debug!(trigger_id = %trigger.id, layer = %layer, "trigger matched");

                let result = self
                    .executor
                    .execute_action_before(&trigger, Arc::clone(&snapshot), deadline)
                    .await;
                if let Err(e) = self.registry.record_execution(&trigger.id, result.success).await {
                    warn!(trigger_id = %trigger.id, error = %e, "could not record execution");
                }

                if result.success {
                    self.update(|inner| {
                        inner.phase = Phase::Fired(layer);
                        inner.stats.total_fired = inner.stats.total_fired.saturating_add(1);
                        let slot = inner.stats.per_layer.entry(layer).or_insert(0);
                        *slot = slot.saturating_add(1);
                    });
                    info!(
                        tick = snapshot.tick,
                        trigger_id = %trigger.id,
                        layer = %layer,
                        handler = %trigger.action.handler,
                        "trigger fired"
                    );
                    let decision = Decision {
                        trigger_id: trigger.id.clone(),
                        trigger_name: trigger.name.clone(),
                        tier: layer,
                        handler: trigger.action.handler.clone(),
                        params: trigger.action.params.clone(),
                        payload: result.payload,
                        execution_time: result.execution_time,
                    };
                    return TickReport {
                        tick: snapshot.tick,
                        outcome: TickOutcome::Fired(decision),
                        failures,
                        latency: started.elapsed(),
                    };
                }

                self.update(|inner| {
                    inner.stats.total_failures = inner.stats.total_failures.saturating_add(1);
                });
                failures.push(FailureRecord {
                    trigger_id: trigger.id.clone(),
                    error: result
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_default(),
                });
            }
        }

        self.update(|inner| inner.phase = Phase::Idle);
        debug!(tick = snapshot.tick, failures = failures.len(), "no trigger fired");
        TickReport {
            tick: snapshot.tick,
            outcome: TickOutcome::NoAction,
            failures,
            latency: started.elapsed(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.inner.lock().map(|inner| inner.phase).unwrap_or_default()
    }

    /// Layer being evaluated or last fired, if any.
    pub fn active_layer(&self) -> Option<Layer> {
        match self.phase() {
            Phase::Idle => None,
            Phase::Evaluating(layer) | Phase::Fired(layer) => Some(layer),
        }
    }

    /// Counters since startup or the last reset.
    pub fn statistics(&self) -> CoordinatorStatistics {
        self.inner
            .lock()
            .map(|inner| inner.stats.clone())
            .unwrap_or_default()
    }

    /// Zero all counters.
    pub fn reset_statistics(&self) {
        self.update(|inner| inner.stats = CoordinatorStatistics::default());
        info!("coordinator statistics reset");
    }

    fn update(&self, f: impl FnOnce(&mut CoordinatorInner)) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        f(&mut inner);
    }
}

/// Leaves the phase at `Idle` if a tick ends mid-evaluation, including when
/// its future is dropped.
struct PhaseReset<'a>(&'a Mutex<CoordinatorInner>);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        let Ok(mut inner) = self.0.lock() else {
            return;
        };
        if matches!(inner.phase, Phase::Evaluating(_)) {
            inner.phase = Phase::Idle;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Operator};
    use crate::executor::{ActionHandler, HandlerContext, HandlerTable};
    use crate::trigger::{Action, Trigger};
    use async_trait::async_trait;
    use korebot_types::{CharacterState, Position};

    struct Named(&'static str);

    #[async_trait]
    impl ActionHandler for Named {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!({ "ran": self.0 }))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl ActionHandler for Sleepy {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(serde_json::Value::Null)
        }
    }

    struct Broken;

    #[async_trait]
    impl ActionHandler for Broken {
        async fn handle(&self, _ctx: HandlerContext) -> Result<serde_json::Value, String> {
            Err("broken".to_owned())
        }
    }

    fn snapshot(hp: u32) -> Arc<StateSnapshot> {
        Arc::new(StateSnapshot {
            tick: 9,
            character: CharacterState {
                name: "Tester".to_owned(),
                job_class: "archer".to_owned(),
                level: 1,
                job_level: 1,
                hp,
                max_hp: 100,
                sp: 50,
                max_sp: 100,
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

    fn coordinator() -> TriggerCoordinator {
        let handlers = HandlerTable::new()
            .with("a", Arc::new(Named("a")))
            .with("b", Arc::new(Named("b")))
            .with("broken", Arc::new(Broken))
            .with("sleepy", Arc::new(Sleepy));
        TriggerCoordinator::new(
            Arc::new(TriggerRegistry::new()),
            Arc::new(TriggerExecutor::new(handlers)),
        )
    }

    fn always(id: &str, layer: Layer, priority: i32, handler: &str) -> Trigger {
        Trigger::new(id, layer, priority, Condition::all(Vec::new()), Action::new(handler))
    }

    #[tokio::test]
    async fn no_triggers_means_no_action() {
        let c = coordinator();
        let report = c.process_game_state(snapshot(100)).await;
        assert_eq!(report.outcome, TickOutcome::NoAction);
        assert_eq!(c.phase(), Phase::Idle);
        assert_eq!(report.tick, 9);
    }

    #[tokio::test]
    async fn failure_falls_through_to_next_trigger() {
        let c = coordinator();
        let _ = c.registry().register(always("bad", Layer::Reflex, 1, "broken")).await;
        let _ = c.registry().register(always("good", Layer::Tactical, 1, "b")).await;

        let report = c.process_game_state(snapshot(100)).await;
        let decision = report.decision().cloned();
        assert_eq!(decision.map(|d| d.trigger_id), Some("good".to_owned()));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures.first().map(|f| f.trigger_id.as_str()), Some("bad"));
        assert_eq!(c.phase(), Phase::Fired(Layer::Tactical));

        let stats = c.statistics();
        assert_eq!(stats.total_fired, 1);
        assert_eq!(stats.total_failures, 1);
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.per_layer.get(&Layer::Tactical), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_action_still_starts_cooldown() {
        let c = coordinator();
        let t = always("bad", Layer::Reflex, 1, "broken").with_cooldown(Duration::from_secs(3));
        let _ = c.registry().register(t).await;

        let first = c.process_game_state(snapshot(100)).await;
        assert_eq!(first.failures.len(), 1);
        let second = c.process_game_state(snapshot(100)).await;
        assert!(second.failures.is_empty());

        tokio::time::advance(Duration::from_secs(3)).await;
        let third = c.process_game_state(snapshot(100)).await;
        assert_eq!(third.failures.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_turns_slow_action_into_failure_and_falls_through() {
        let c = coordinator();
        let _ = c.registry().register(always("slow", Layer::Reflex, 1, "sleepy")).await;
        let _ = c.registry().register(always("next", Layer::Tactical, 1, "b")).await;

        let report = c
            .process_game_state_within(snapshot(100), Duration::from_millis(50))
            .await;
        assert_eq!(report.decision().map(|d| d.trigger_id.clone()), Some("next".to_owned()));
        assert_eq!(
            report.failures,
            vec![FailureRecord {
                trigger_id: "slow".to_owned(),
                error: "timeout after 50ms".to_owned(),
            }]
        );
        assert_eq!(c.phase(), Phase::Fired(Layer::Tactical));
        assert_eq!(c.statistics().total_failures, 1);

        let runtime = c.registry().runtime("slow").await;
        assert_eq!(runtime.map(|r| (r.execution_count, r.failure_count)), Some((1, 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_tick_returns_to_idle() {
        let c = coordinator();
        let _ = c.registry().register(always("slow", Layer::Reflex, 1, "sleepy")).await;
        let dropped =
            tokio::time::timeout(Duration::from_millis(20), c.process_game_state(snapshot(100)))
                .await;
        assert!(dropped.is_err());
        assert_eq!(c.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn priority_orders_within_layer() {
        let c = coordinator();
        let _ = c.registry().register(always("second", Layer::Tactical, 2, "b")).await;
        let _ = c.registry().register(always("first", Layer::Tactical, 1, "a")).await;
        let report = c.process_game_state(snapshot(100)).await;
        assert_eq!(report.decision().map(|d| d.payload.clone()), Some(serde_json::json!({ "ran": "a" })));
    }

    #[tokio::test]
    async fn non_matching_conditions_are_counted_but_skipped() {
        let c = coordinator();
        let low_hp = Trigger::new(
            "heal",
            Layer::Reflex,
            1,
            Condition::simple("hp_percent", Operator::Le, 25.0),
            Action::new("a"),
        );
        let _ = c.registry().register(low_hp).await;
        let report = c.process_game_state(snapshot(90)).await;
        assert_eq!(report.outcome, TickOutcome::NoAction);
        assert_eq!(c.statistics().total_checks, 1);

        c.reset_statistics();
        assert_eq!(c.statistics(), CoordinatorStatistics::default());
    }
}
