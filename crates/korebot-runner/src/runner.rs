//! Agent loop: snapshot in, decision record out.
//!
//! Each input line is one JSON [`StateSnapshot`]. Per tick the runner:
//! 1. Drains finished reasoning requests into the memo
//! 2. Attaches the memo to the snapshot
//! 3. Runs the trigger coordinator with the tick deadline as its budget
//! 4. Writes one JSON [`DecisionRecord`] line
//!
//! Sync actions that outlast the budget become timeout failures and the
//! tick falls through to lower layers. A tick still running
//! [`DEADLINE_GRACE`] past its deadline is abandoned and yields a
//! "no action" record with reason `deadline`, so the host never misses a
//! tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use korebot_core::{TickOutcome, TickReport, TriggerCoordinator};
use korebot_types::{DecisionRecord, NoActionReason, RequestId, StateSnapshot};

use crate::error::RunnerError;
use crate::reasoning::ReasoningScheduler;

/// How long a tick may overrun its deadline before it is abandoned.
pub const DEADLINE_GRACE: Duration = Duration::from_millis(50);

/// Drives the coordinator once per snapshot.
#[derive(Debug)]
pub struct AgentRunner {
    coordinator: Arc<TriggerCoordinator>,
    scheduler: Option<Arc<ReasoningScheduler>>,
    tick_deadline: Duration,
}

impl AgentRunner {
    /// Create a runner. Without a scheduler no memo is ever attached.
    pub const fn new(
        coordinator: Arc<TriggerCoordinator>,
        scheduler: Option<Arc<ReasoningScheduler>>,
        tick_deadline: Duration,
    ) -> Self {
        Self {
            coordinator,
            scheduler,
            tick_deadline,
        }
    }

    /// Read snapshots from `reader` until EOF, writing one record per line.
    ///
    /// Lines that are not valid snapshots are logged and skipped. Returns
    /// the number of records written.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Io`] if reading or writing fails.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<u64, RunnerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut written = 0u64;
        info!(
            tick_deadline_ms = u64::try_from(self.tick_deadline.as_millis()).unwrap_or(u64::MAX),
            reasoning = self.scheduler.is_some(),
            "agent loop started, awaiting snapshots"
        );

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let snapshot: StateSnapshot = match serde_json::from_str(line) {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(error = %e, "failed to deserialize snapshot, skipping");
                    continue;
                }
            };

            let record = self.decide(snapshot).await;
            let mut out = serde_json::to_string(&record)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
            written = written.saturating_add(1);
        }

        info!(records = written, "input closed, agent loop shutting down");
        Ok(written)
    }

    /// Produce the decision record for one snapshot.
    pub async fn decide(&self, snapshot: StateSnapshot) -> DecisionRecord {
        let started = Instant::now();
        let tick = snapshot.tick;
        let memo = self.scheduler.as_ref().and_then(|s| s.poll(tick));
        let snapshot = Arc::new(snapshot.with_reasoning(memo));

        match timeout(
            self.tick_deadline.saturating_add(DEADLINE_GRACE),
            self.coordinator
                .process_game_state_within(snapshot, self.tick_deadline),
        )
        .await
        {
            Ok(report) => {
                let record = to_record(report, started.elapsed());
                debug!(
                    tick,
                    tier = record.tier.map_or("none", |t| t.as_str()),
                    handler = record.handler.as_deref().unwrap_or("none"),
                    latency_us = record.latency_us,
                    "decision made"
                );
                record
            }
            Err(_) => {
                warn!(
                    tick,
                    deadline_ms = u64::try_from(self.tick_deadline.as_millis()).unwrap_or(u64::MAX),
                    "tick abandoned past its deadline, emitting no action"
                );
                DecisionRecord::no_action(tick, NoActionReason::Deadline, micros(started.elapsed()))
            }
        }
    }
}

fn to_record(report: TickReport, elapsed: Duration) -> DecisionRecord {
    let latency_us = micros(elapsed);
    match report.outcome {
        TickOutcome::Fired(decision) => DecisionRecord {
            request_id: RequestId::new(),
            tick: report.tick,
            tier: Some(decision.tier),
            trigger_id: Some(decision.trigger_id),
            handler: Some(decision.handler),
            params: decision.params,
            payload: decision.payload,
            no_action: None,
            failures: report.failures,
            latency_us,
            emitted_at: Utc::now(),
        },
        TickOutcome::NoAction => {
            let mut record =
                DecisionRecord::no_action(report.tick, NoActionReason::NoTrigger, latency_us);
            record.failures = report.failures;
            record
        }
    }
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use korebot_core::config::TuningConfig;
    use korebot_core::handlers::builtin_handlers;
    use korebot_core::coordinator::Phase;
    use korebot_core::{
        Action, ActionHandler, Condition, HandlerContext, HandlerTable, Operator, Trigger,
        TriggerExecutor, TriggerRegistry,
    };
    use korebot_types::{FailureRecord, Layer};
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::chain::tests::{MockProvider, Reply};
    use crate::handlers::with_reasoning_handlers;
    use crate::reasoning::tests::scheduler;

    struct Stall;

    #[async_trait]
    impl ActionHandler for Stall {
        async fn handle(&self, _ctx: HandlerContext) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        }
    }

    /// Heals after a long pause, remembering that it got that far.
    struct LateHeal(Arc<AtomicBool>);

    #[async_trait]
    impl ActionHandler for LateHeal {
        async fn handle(&self, _ctx: HandlerContext) -> Result<Value, String> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.0.store(true, Ordering::SeqCst);
            Ok(json!({ "command": "is Red Potion" }))
        }
    }

    struct Sit;

    #[async_trait]
    impl ActionHandler for Sit {
        async fn handle(&self, _ctx: HandlerContext) -> Result<Value, String> {
            Ok(json!({ "command": "sit" }))
        }
    }

    async fn coordinator(handlers: HandlerTable, triggers: Vec<Trigger>) -> Arc<TriggerCoordinator> {
        let registry = Arc::new(TriggerRegistry::new());
        for trigger in triggers {
            registry
                .register(trigger)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
        Arc::new(TriggerCoordinator::new(
            registry,
            Arc::new(TriggerExecutor::new(handlers)),
        ))
    }

    fn heal() -> Trigger {
        Trigger::new(
            "low_hp_heal",
            Layer::Reflex,
            1,
            Condition::simple("hp_percent", Operator::Le, 25.0),
            Action::new("emergency_heal"),
        )
    }

    fn line(tick: u64, hp: u32) -> String {
        json!({
            "tick": tick,
            "character": { "name": "Luna", "hp": hp, "max_hp": 100 },
            "inventory": [{ "item_id": 569, "name": "Red Potion", "amount": 3 }]
        })
        .to_string()
    }

    fn snapshot(tick: u64, hp: u32) -> StateSnapshot {
        serde_json::from_str(&line(tick, hp)).unwrap_or_else(|e| panic!("{e}"))
    }

    #[tokio::test]
    async fn json_lines_in_records_out() {
        let handlers = builtin_handlers(&TuningConfig::default());
        let runner = AgentRunner::new(
            coordinator(handlers, vec![heal()]).await,
            None,
            Duration::from_millis(50),
        );

        let input = format!("{}\nnot json\n\n{}\n", line(1, 20), line(2, 90));
        let mut output = Vec::new();
        let written = runner
            .run(input.as_bytes(), &mut output)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(written, 2);

        let text = String::from_utf8(output).unwrap_or_default();
        let records: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap_or_default())
            .collect();
        assert_eq!(records.len(), 2);

        let first = records.first().cloned().unwrap_or_default();
        assert_eq!(first["tick"], 1);
        assert_eq!(first["tier"], "reflex");
        assert_eq!(first["handler"], "emergency_heal");
        assert_eq!(first["payload"]["command"], "is Red Potion");

        let second = records.get(1).cloned().unwrap_or_default();
        assert_eq!(second["tick"], 2);
        assert_eq!(second["tier"], Value::Null);
        assert_eq!(second["no_action"], "no_trigger");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_reflex_times_out_and_tactical_answers() {
        let healed = Arc::new(AtomicBool::new(false));
        let handlers = HandlerTable::new()
            .with("late_heal", Arc::new(LateHeal(Arc::clone(&healed))))
            .with("sit", Arc::new(Sit));
        let slow_heal = Trigger::new(
            "low_hp_heal",
            Layer::Reflex,
            1,
            Condition::simple("hp_percent", Operator::Le, 25.0),
            Action::new("late_heal"),
        );
        let rest = Trigger::new(
            "rest",
            Layer::Tactical,
            1,
            Condition::all(Vec::new()),
            Action::new("sit"),
        );
        let coordinator = coordinator(handlers, vec![slow_heal, rest]).await;
        let runner = AgentRunner::new(Arc::clone(&coordinator), None, Duration::from_millis(50));

        let record = runner.decide(snapshot(4, 20)).await;
        assert_eq!(record.tier, Some(Layer::Tactical));
        assert_eq!(record.trigger_id.as_deref(), Some("rest"));
        assert_eq!(record.payload["command"], "sit");
        assert_eq!(
            record.failures,
            vec![FailureRecord {
                trigger_id: "low_hp_heal".to_owned(),
                error: "timeout after 50ms".to_owned(),
            }]
        );
        assert_eq!(coordinator.phase(), Phase::Fired(Layer::Tactical));

        let heal = coordinator.registry().runtime("low_hp_heal").await;
        assert_eq!(
            heal.map(|r| (r.execution_count, r.success_count, r.failure_count)),
            Some((1, 0, 1))
        );
        assert_eq!(coordinator.statistics().total_failures, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!healed.load(Ordering::SeqCst), "timed-out heal must not run later");
    }

    #[tokio::test(start_paused = true)]
    async fn tick_past_grace_yields_deadline_record() {
        let handlers = HandlerTable::new().with("stall", Arc::new(Stall));
        let stalls: Vec<Trigger> = (1..=12_i32)
            .map(|i| {
                Trigger::new(
                    &format!("stall_{i}"),
                    Layer::Tactical,
                    i,
                    Condition::simple("hp_percent", Operator::Gt, 0.0),
                    Action::new("stall").with_timeout(Duration::from_secs(30)),
                )
            })
            .collect();
        let coordinator = coordinator(handlers, stalls).await;
        let runner = AgentRunner::new(Arc::clone(&coordinator), None, Duration::from_millis(50));

        let record = runner.decide(snapshot(7, 90)).await;
        assert!(!record.is_action());
        assert_eq!(record.tick, 7);
        assert_eq!(record.no_action, Some(NoActionReason::Deadline));
        assert_eq!(coordinator.phase(), Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reasoning_memo_is_followed_on_a_later_tick() {
        let reply = r#"{"action": "command", "params": {"command": "storage"}, "reason": "overweight"}"#;
        let provider = MockProvider::new("DeepSeek", 1, true, Reply::Text(reply.to_owned()))
            .delayed(Duration::from_millis(300));
        let scheduler = Arc::new(scheduler(vec![Arc::new(provider)], Duration::from_secs(30)).await);

        let follow = Trigger::new(
            "follow",
            Layer::Reasoning,
            1,
            Condition::simple("reasoning.age_ticks", Operator::Le, 1.0),
            Action::new("follow_reasoning"),
        );
        let ask = Trigger::new(
            "ask",
            Layer::Reasoning,
            2,
            Condition::simple("hp_percent", Operator::Gt, 50.0),
            Action::new("request_reasoning"),
        );
        let handlers = with_reasoning_handlers(builtin_handlers(&TuningConfig::default()), &scheduler);
        let runner = AgentRunner::new(
            coordinator(handlers, vec![heal(), follow, ask]).await,
            Some(Arc::clone(&scheduler)),
            Duration::from_millis(50),
        );

        let first = runner.decide(snapshot(1, 90)).await;
        assert_eq!(first.trigger_id.as_deref(), Some("ask"));
        assert_eq!(first.payload["reasoning_requested"], true);

        tokio::time::sleep(Duration::from_secs(1)).await;

        let second = runner.decide(snapshot(2, 90)).await;
        assert_eq!(second.tier, Some(Layer::Reasoning));
        assert_eq!(second.trigger_id.as_deref(), Some("follow"));
        assert_eq!(second.payload["command"], "storage");

        let urgent = runner.decide(snapshot(3, 10)).await;
        assert_eq!(urgent.tier, Some(Layer::Reflex), "reflex still preempts reasoning");
    }
}
