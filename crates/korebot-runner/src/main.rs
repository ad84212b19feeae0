//! Agent runtime entry point for the korebot decision engine.
//!
//! The runner reads one JSON state snapshot per line on stdin, runs the
//! tiered trigger coordinator over it and writes one JSON decision record
//! per line on stdout. Logs go to stderr so stdout stays the decision
//! stream.
//!
//! # Architecture
//!
//! ```text
//! stdin (snapshot) --> memo attach --> Reflex -> Tactical -> Learned -> Reasoning --> stdout (record)
//!                          ^                                              |
//!                          +---- poll <-- provider chain <-- request -----+
//! ```
//!
//! Remote reasoning never blocks a tick: requests run on background tasks
//! and their answers are consumed on a later tick through the memo.

mod chain;
mod config;
mod error;
mod handlers;
mod parse;
mod prompt;
mod provider;
mod reasoning;
mod runner;

use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use korebot_core::config::TuningConfig;
use korebot_core::handlers::builtin_handlers;
use korebot_core::registry::ConfigFormat;
use korebot_core::{TriggerCoordinator, TriggerExecutor, TriggerRegistry};

use crate::chain::ProviderChain;
use crate::config::RunnerConfig;
use crate::handlers::with_reasoning_handlers;
use crate::prompt::PromptEngine;
use crate::provider::build_providers;
use crate::reasoning::ReasoningScheduler;
use crate::runner::AgentRunner;

/// Trigger set used when `KOREBOT_TRIGGERS` is unset.
const DEFAULT_TRIGGERS: &str = include_str!("../config/triggers.yaml");

/// Application entry point.
///
/// Initializes logging, loads configuration from environment variables,
/// builds the provider chain, handler table and trigger registry, then runs
/// the agent loop until stdin closes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("korebot-runner starting");

    let config = RunnerConfig::from_env()?;
    info!(
        triggers = ?config.triggers_path,
        tuning = ?config.tuning_path,
        tick_deadline_ms = u64::try_from(config.tick_deadline.as_millis()).unwrap_or(u64::MAX),
        reasoning_deadline_ms =
            u64::try_from(config.reasoning_deadline.as_millis()).unwrap_or(u64::MAX),
        "configuration loaded"
    );

    let tuning = match &config.tuning_path {
        Some(path) => TuningConfig::from_file(path)?,
        None => TuningConfig::default(),
    };

    let prompts = Arc::new(PromptEngine::new(config.templates_dir.as_deref())?);
    let chain = Arc::new(ProviderChain::new(
        build_providers(&config),
        config.provider_timeout,
    ));
    chain.initialize().await;
    let statuses = chain.available_providers().await;
    for status in &statuses {
        debug!(
            provider = %status.name,
            priority = status.priority,
            model = %status.model,
            available = status.available,
            "provider status"
        );
    }
    if !statuses.iter().any(|s| s.available) {
        warn!("no reasoning provider available, reasoning layer will stay idle");
    }

    let base = builtin_handlers(&tuning);
    let mut actions = base.handler_ids();
    actions.sort();
    let scheduler = Arc::new(ReasoningScheduler::new(
        chain,
        prompts,
        actions,
        config.reasoning_deadline,
    ));
    let handlers = with_reasoning_handlers(base, &scheduler);
    info!(handlers = ?handlers.handler_ids(), "handler table built");

    let registry = Arc::new(TriggerRegistry::new());
    let report = match &config.triggers_path {
        Some(path) => registry.load_from_config(path).await?,
        None => {
            registry
                .load_from_str(DEFAULT_TRIGGERS, ConfigFormat::Yaml)
                .await?
        }
    };
    info!(
        loaded = report.loaded,
        skipped = report.skipped,
        "triggers registered"
    );

    let coordinator = Arc::new(TriggerCoordinator::new(
        registry,
        Arc::new(TriggerExecutor::new(handlers)),
    ));
    let runner = AgentRunner::new(coordinator, Some(Arc::clone(&scheduler)), config.tick_deadline);

    info!("agent runner initialized, entering decision loop");
    let records = runner
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;

    info!(
        records,
        reasoning_pending = scheduler.is_pending(),
        has_memo = scheduler.memo().is_some(),
        "korebot-runner stopped"
    );
    Ok(())
}
