//! Tiered trigger coordination for the korebot agent.
//!
//! Each tick the [`TriggerCoordinator`] walks the decision layers in fixed
//! order (reflex, tactical, learned, reasoning), evaluates the registered
//! triggers of each layer in priority order and runs the action of the first
//! match through the [`TriggerExecutor`]. The first successful action ends
//! the tick.
//!
//! # Modules
//!
//! - [`condition`] -- Condition trees and their evaluation against a snapshot.
//! - [`config`] -- Tuning tables for kiting and target selection, loaded
//!   from YAML.
//! - [`coordinator`] -- The per-tick layer walk.
//! - [`error`] -- Error types for the registry, executor and config loading.
//! - [`executor`] -- [`ActionHandler`] trait, handler table and execution
//!   with timeouts.
//! - [`handlers`] -- Built-in handlers (heal, kite, select target, command).
//! - [`kiting`] -- Combat-distance state machine and per-combat sessions.
//! - [`random`] -- Injectable randomness for movement perturbation.
//! - [`registry`] -- Trigger storage, cooldowns and config loading.
//! - [`targeting`] -- Multi-factor target scoring with a hysteresis lock.
//! - [`trigger`] -- Trigger and action definitions.
//!
//! [`TriggerCoordinator`]: coordinator::TriggerCoordinator
//! [`TriggerExecutor`]: executor::TriggerExecutor
//! [`ActionHandler`]: executor::ActionHandler

pub mod condition;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod kiting;
pub mod random;
pub mod registry;
pub mod targeting;
pub mod trigger;

pub use condition::{CompoundOperator, Condition, Operator};
pub use config::TuningConfig;
pub use coordinator::{Decision, TickOutcome, TickReport, TriggerCoordinator};
pub use executor::{ActionHandler, HandlerContext, HandlerTable, TriggerExecutor};
pub use registry::TriggerRegistry;
pub use trigger::{Action, Trigger};
