//! Type-safe identifier wrappers.
//!
//! Monster ids come from the game server and are plain integers; request ids
//! are generated on our side with UUID v7 (time-ordered) so decision records
//! sort by emission time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-assigned identifier of a monster visible to the character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonsterId(pub u64);

impl MonsterId {
    /// Return the raw server id.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for MonsterId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MonsterId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Identifier stamped on every emitted decision record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monster_id_serializes_as_bare_number() {
        let json = serde_json::to_string(&MonsterId(1002)).unwrap_or_default();
        assert_eq!(json, "1002");
    }

    #[test]
    fn request_ids_are_time_ordered() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert!(a <= b);
        assert_ne!(a, b);
    }
}
