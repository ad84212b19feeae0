//! Background reasoning requests and the cached memo.
//!
//! Reasoning never blocks a tick. [`ReasoningScheduler::request`] renders
//! the prompt and spawns the chain query on a tokio task; the completion is
//! posted to a channel that [`ReasoningScheduler::poll`] drains at the start
//! of a later tick, updating the memo that reasoning-layer triggers read.
//!
//! At most one request is outstanding. A request older than the deadline is
//! abandoned so a new one can be submitted; if the abandoned request still
//! answers, its result is cached with `late = true`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use korebot_types::{ReasoningMemo, StateSnapshot};

use crate::chain::{ProviderChain, ProviderResponse};
use crate::error::RunnerError;
use crate::parse::parse_reasoning_reply;
use crate::prompt::PromptEngine;

struct Completion {
    id: u64,
    requested_tick: u64,
    result: Result<ProviderResponse, RunnerError>,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    id: u64,
    requested_tick: u64,
    started: Instant,
}

struct SchedulerState {
    memo: Option<ReasoningMemo>,
    pending: Option<Pending>,
    next_id: u64,
    completions: mpsc::UnboundedReceiver<Completion>,
}

/// Submits reasoning requests and caches the latest answer.
pub struct ReasoningScheduler {
    chain: Arc<ProviderChain>,
    prompts: Arc<PromptEngine>,
    actions: Vec<String>,
    deadline: Duration,
    sender: mpsc::UnboundedSender<Completion>,
    state: Mutex<SchedulerState>,
}

impl ReasoningScheduler {
    /// Create a scheduler offering `actions` to the reasoning layer.
    pub fn new(
        chain: Arc<ProviderChain>,
        prompts: Arc<PromptEngine>,
        actions: Vec<String>,
        deadline: Duration,
    ) -> Self {
        let (sender, completions) = mpsc::unbounded_channel();
        Self {
            chain,
            prompts,
            actions,
            deadline,
            sender,
            state: Mutex::new(SchedulerState {
                memo: None,
                pending: None,
                next_id: 0,
                completions,
            }),
        }
    }

    /// Submit a request for `snapshot` on a background task.
    ///
    /// Returns `false` when a request is already outstanding or the prompt
    /// could not be rendered. Must be called from within a tokio runtime.
    pub fn request(&self, snapshot: &StateSnapshot) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        if let Some(pending) = state.pending
            && pending.started.elapsed() < self.deadline
        {
            debug!(request = pending.id, "reasoning request already outstanding");
            return false;
        }

        let prompt = match self.prompts.render(snapshot, &self.actions) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(error = %e, "failed to render reasoning prompt");
                return false;
            }
        };
        if let Some(pending) = state.pending {
            warn!(
                request = pending.id,
                requested_tick = pending.requested_tick,
                "abandoning reasoning request past its deadline"
            );
        }
        let id = state.next_id;
        state.next_id = id.saturating_add(1);
        state.pending = Some(Pending {
            id,
            requested_tick: snapshot.tick,
            started: Instant::now(),
        });
        drop(state);

        let chain = Arc::clone(&self.chain);
        let sender = self.sender.clone();
        let requested_tick = snapshot.tick;
        tokio::spawn(async move {
            let result = chain.query(&prompt).await;
            // The receiver lives as long as the scheduler.
            let _ = sender.send(Completion {
                id,
                requested_tick,
                result,
            });
        });
        info!(request = id, tick = requested_tick, "reasoning requested");
        true
    }

    /// Drain finished requests and return the current memo.
    pub fn poll(&self, tick: u64) -> Option<ReasoningMemo> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        while let Ok(completion) = state.completions.try_recv() {
            let current = state.pending.filter(|p| p.id == completion.id);
            if current.is_some() {
                state.pending = None;
            }
            let late = current.is_none_or(|p| p.started.elapsed() > self.deadline);

            let response = match completion.result {
                Ok(response) => response,
                Err(e) => {
                    warn!(
                        request = completion.id,
                        error = %e,
                        "no reasoning available"
                    );
                    continue;
                }
            };

            let superseded = state
                .memo
                .as_ref()
                .is_some_and(|m| m.requested_tick > completion.requested_tick);
            if superseded {
                debug!(request = completion.id, "dropping reasoning reply older than memo");
                continue;
            }

            let reply = parse_reasoning_reply(&response.text);
            info!(
                request = completion.id,
                provider = %response.provider,
                action = reply.action.as_deref().unwrap_or("none"),
                late,
                "reasoning completed"
            );
            state.memo = Some(ReasoningMemo {
                provider: response.provider,
                model: response.model,
                action: reply.action,
                params: reply.params,
                reason: reply.reason,
                requested_tick: completion.requested_tick,
                completed_tick: tick,
                late,
            });
        }
        state.memo.clone()
    }

    /// The current memo without draining.
    pub fn memo(&self) -> Option<ReasoningMemo> {
        self.state.lock().ok().and_then(|s| s.memo.clone())
    }

    /// Whether a request is outstanding.
    pub fn is_pending(&self) -> bool {
        self.state.lock().is_ok_and(|s| s.pending.is_some())
    }
}

impl core::fmt::Debug for ReasoningScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReasoningScheduler")
            .field("chain", &self.chain)
            .field("actions", &self.actions)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::tests::{MockProvider, Reply, as_dyn};

    pub fn snapshot(tick: u64) -> StateSnapshot {
        let value = serde_json::json!({
            "tick": tick,
            "character": { "name": "Luna", "hp": 900, "max_hp": 1000 }
        });
        serde_json::from_value(value).unwrap_or_else(|e| panic!("bad snapshot: {e}"))
    }

    pub async fn scheduler(providers: Vec<Arc<MockProvider>>, deadline: Duration) -> ReasoningScheduler {
        let chain = Arc::new(ProviderChain::new(as_dyn(providers), Duration::from_secs(20)));
        chain.initialize().await;
        let prompts = Arc::new(PromptEngine::new(None).unwrap_or_else(|e| panic!("{e}")));
        ReasoningScheduler::new(chain, prompts, vec!["command".to_owned()], deadline)
    }

    #[tokio::test(start_paused = true)]
    async fn outstanding_request_is_rejected_before_rendering() {
        let dir = std::env::temp_dir().join(format!(
            "korebot_tick_gated_templates_{}_{:?}",
            std::process::id(),
            std::thread::current().id(),
        ));
        std::fs::create_dir_all(&dir).ok();
        std::fs::write(dir.join("system.j2"), "sys").ok();
        std::fs::write(
            dir.join("user.j2"),
            "{% if tick > 1 %}{{ no_such_function() }}{% endif %}tick {{ tick }}",
        )
        .ok();
        let prompts = Arc::new(PromptEngine::new(Some(dir.as_path())).unwrap_or_else(|e| panic!("{e}")));
        let provider = Arc::new(MockProvider::new("OpenAI", 1, true, Reply::Hang));
        let chain = Arc::new(ProviderChain::new(
            as_dyn(vec![Arc::clone(&provider)]),
            Duration::from_secs(20),
        ));
        chain.initialize().await;
        let scheduler = ReasoningScheduler::new(chain, prompts, Vec::new(), Duration::from_secs(30));

        assert!(!scheduler.request(&snapshot(2)), "render failure submits nothing");
        assert!(!scheduler.is_pending());

        assert!(scheduler.request(&snapshot(1)));
        assert!(!scheduler.request(&snapshot(2)));
        assert!(scheduler.is_pending());

        std::fs::remove_dir_all(&dir).ok();
    }

    const REPLY: &str = r#"{"action": "command", "params": {"command": "sit"}, "reason": "rest"}"#;

    #[tokio::test(start_paused = true)]
    async fn completed_request_becomes_memo() {
        let provider = MockProvider::new("OpenAI", 1, true, Reply::Text(REPLY.to_owned()))
            .delayed(Duration::from_millis(200));
        let scheduler = scheduler(vec![Arc::new(provider)], Duration::from_secs(30)).await;

        assert!(scheduler.request(&snapshot(1)));
        assert!(!scheduler.request(&snapshot(2)), "one request at a time");
        assert!(scheduler.poll(2).is_none());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let memo = scheduler.poll(5).unwrap_or_else(|| panic!("no memo"));
        assert_eq!(memo.provider, "OpenAI");
        assert_eq!(memo.action.as_deref(), Some("command"));
        assert_eq!(memo.params, serde_json::json!({ "command": "sit" }));
        assert_eq!(memo.requested_tick, 1);
        assert_eq!(memo.completed_tick, 5);
        assert!(!memo.late);
        assert!(!scheduler.is_pending());
        assert_eq!(scheduler.memo(), Some(memo));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_request_is_abandoned_and_cached_late() {
        let provider = MockProvider::new("OpenAI", 1, true, Reply::Text(REPLY.to_owned()))
            .delayed(Duration::from_secs(10));
        let scheduler = scheduler(vec![Arc::new(provider)], Duration::from_secs(1)).await;

        assert!(scheduler.request(&snapshot(1)));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(scheduler.request(&snapshot(2)), "expired request is replaced");

        // First reply lands at 10s, the replacement at 12s.
        tokio::time::sleep(Duration::from_secs(9)).await;
        let memo = scheduler.poll(3).unwrap_or_else(|| panic!("no memo"));
        assert!(memo.late);
        assert_eq!(memo.requested_tick, 1);
        assert!(scheduler.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn total_failure_keeps_previous_memo() {
        let provider = MockProvider::new("OpenAI", 1, true, Reply::Fail("500".to_owned()));
        let scheduler = scheduler(vec![Arc::new(provider)], Duration::from_secs(30)).await;

        assert!(scheduler.request(&snapshot(1)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(scheduler.poll(2).is_none());
        assert!(!scheduler.is_pending());
        assert!(scheduler.request(&snapshot(3)), "new request allowed after failure");
    }
}
