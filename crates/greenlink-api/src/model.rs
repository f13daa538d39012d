// ── Shared wire types ──
//
// Identifiers and the snapshot payload shared between the snapshot
// endpoint, the push transport, and the core reconciliation layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a scoped entity (a growing zone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for EntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordering timestamp assigned by the backend, never by the local clock.
///
/// Only its ordering matters to the multiplexer; the backend sends epoch
/// milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerTimestamp(i64);

impl ServerTimestamp {
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ServerTimestamp {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Authoritative entity state as returned by the snapshot endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Opaque entity state; the multiplexer never interprets it.
    #[serde(default)]
    pub state: serde_json::Value,

    #[serde(alias = "server_timestamp", alias = "serverTs")]
    pub server_ts: ServerTimestamp,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_accepts_timestamp_aliases() {
        let a: EntitySnapshot =
            serde_json::from_str(r#"{"state":{"ph":6.1},"server_ts":100}"#).unwrap();
        let b: EntitySnapshot =
            serde_json::from_str(r#"{"state":{"ph":6.1},"server_timestamp":100}"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.server_ts, ServerTimestamp::new(100));
    }

    #[test]
    fn timestamps_order_numerically() {
        assert!(ServerTimestamp::new(90) < ServerTimestamp::new(110));
    }

    #[test]
    fn entity_id_is_transparent() {
        let id: EntityId = serde_json::from_str("42").unwrap();
        assert_eq!(id, EntityId::new(42));
        assert_eq!(id.to_string(), "42");
    }
}
