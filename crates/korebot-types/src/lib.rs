//! Shared type definitions for the korebot agent.
//!
//! This crate is the single source of truth for the data that crosses crate
//! boundaries: the per-tick world snapshot the host feeds in, and the
//! decision records the agent loop emits.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe identifier wrappers
//! - [`enums`] -- Decision layers, elements, execution modes, kiting states
//! - [`snapshot`] -- The read-only per-tick [`StateSnapshot`] and field-path
//!   resolution used by trigger conditions
//! - [`decision`] -- [`DecisionRecord`] emitted once per tick

pub mod decision;
pub mod enums;
pub mod ids;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use decision::{DecisionRecord, FailureRecord, NoActionReason};
pub use enums::{Element, ExecutionMode, KitingState, Layer};
pub use ids::{MonsterId, RequestId};
pub use snapshot::{
    CharacterState, FieldValue, InventoryItem, MonsterInfo, NearbyPlayer, Position,
    ReasoningMemo, StateSnapshot,
};
