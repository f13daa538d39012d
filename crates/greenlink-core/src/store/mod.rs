// ── Stores ──
//
// Process-wide caches owned by the realtime service.

pub mod snapshot;

pub use snapshot::{CachedSnapshot, Observation, SnapshotRegistry, SnapshotSource};
