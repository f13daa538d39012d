// ── Snapshot registry ──
//
// Last known authoritative state per zone, stamped with the server's
// timestamp. A zone is reconciled only once it has a snapshot: events for
// it at or below the snapshot timestamp are stale. Accepted events advance
// the timestamp so slower duplicates are rejected too. The server
// timestamp of a zone never moves backwards except through an explicit
// fetch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_core::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use greenlink_api::{EntityId, EntitySnapshot, ServerTimestamp};

/// Where the cached state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SnapshotSource {
    /// Explicit fetch or `set_snapshot`.
    Fetched,
    /// Advanced by an accepted push event.
    Event,
}

/// Cached snapshot of one zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedSnapshot {
    pub entity: EntityId,
    pub state: Arc<Value>,
    pub server_ts: ServerTimestamp,
    pub updated_at: DateTime<Utc>,
    pub source: SnapshotSource,
}

/// Verdict on an inbound event's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The zone has no snapshot; nothing to compare against.
    Untracked,
    /// At or below the baseline. Drop it.
    Stale { baseline: ServerTimestamp },
    /// Newer than the baseline, which now equals the event's timestamp.
    Accepted { previous: Option<ServerTimestamp> },
}

impl Observation {
    pub fn is_stale(self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

/// Per-zone snapshot cache with change notification.
pub struct SnapshotRegistry {
    snapshots: DashMap<EntityId, Arc<CachedSnapshot>>,
    version: watch::Sender<u64>,
}

impl Default for SnapshotRegistry {
    fn default() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            snapshots: DashMap::new(),
            version,
        }
    }
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Overwrite the zone's snapshot. An explicit fetch always wins, even
    /// over a newer event-advanced baseline.
    pub fn set_snapshot(
        &self,
        entity: EntityId,
        state: Value,
        server_ts: ServerTimestamp,
    ) -> Arc<CachedSnapshot> {
        let snapshot = Arc::new(CachedSnapshot {
            entity,
            state: Arc::new(state),
            server_ts,
            updated_at: Utc::now(),
            source: SnapshotSource::Fetched,
        });
        let previous = self.snapshots.insert(entity, snapshot.clone());
        if let Some(previous) = previous.filter(|p| p.server_ts > server_ts) {
            tracing::debug!(
                zone = %entity,
                from = %previous.server_ts,
                to = %server_ts,
                "fetched snapshot moved baseline backwards"
            );
        }
        tracing::debug!(zone = %entity, server_ts = %server_ts, "snapshot installed");
        self.bump();
        snapshot
    }

    /// Install a fetched [`EntitySnapshot`].
    pub fn install(&self, entity: EntityId, snapshot: EntitySnapshot) -> Arc<CachedSnapshot> {
        self.set_snapshot(entity, snapshot.state, snapshot.server_ts)
    }

    /// `true` iff the zone has a snapshot whose timestamp is at or above
    /// `event_ts`. Events without a timestamp are never stale.
    pub fn is_stale(&self, entity: EntityId, event_ts: Option<ServerTimestamp>) -> bool {
        let Some(event_ts) = event_ts else {
            return false;
        };
        self.snapshots
            .get(&entity)
            .is_some_and(|s| s.server_ts >= event_ts)
    }

    /// Check an inbound event against the baseline and advance it when
    /// the event is newer.
    ///
    /// Only a full-state event can create a snapshot for an untracked
    /// zone; delta events leave untracked zones alone.
    pub fn observe(
        &self,
        entity: EntityId,
        event_ts: ServerTimestamp,
        full_state: Option<&Value>,
    ) -> Observation {
        let observation = match self.snapshots.entry(entity) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                if current.server_ts >= event_ts {
                    return Observation::Stale {
                        baseline: current.server_ts,
                    };
                }
                let state = full_state.map_or_else(
                    || current.state.clone(),
                    |state| Arc::new(state.clone()),
                );
                let previous = current.server_ts;
                occupied.insert(Arc::new(CachedSnapshot {
                    entity,
                    state,
                    server_ts: event_ts,
                    updated_at: Utc::now(),
                    source: SnapshotSource::Event,
                }));
                Observation::Accepted {
                    previous: Some(previous),
                }
            }
            Entry::Vacant(vacant) => {
                let Some(state) = full_state else {
                    return Observation::Untracked;
                };
                vacant.insert(Arc::new(CachedSnapshot {
                    entity,
                    state: Arc::new(state.clone()),
                    server_ts: event_ts,
                    updated_at: Utc::now(),
                    source: SnapshotSource::Event,
                }));
                Observation::Accepted { previous: None }
            }
        };
        self.bump();
        observation
    }

    pub fn get(&self, entity: EntityId) -> Option<Arc<CachedSnapshot>> {
        self.snapshots.get(&entity).map(|s| s.clone())
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.snapshots.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&self) {
        self.snapshots.clear();
        self.bump();
    }

    // ── Change notification ──────────────────────────────────────────

    /// Monotonic change counter; bumps on every install or advance.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Stream of change counters, starting with the current one.
    pub fn changes(&self) -> impl Stream<Item = u64> + Send + 'static {
        WatchStream::new(self.version.subscribe())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ts(v: i64) -> ServerTimestamp {
        ServerTimestamp::new(v)
    }

    const ZONE: EntityId = EntityId::new(7);

    #[test]
    fn stale_events_are_dropped_and_accepted_ones_advance() {
        let store = SnapshotRegistry::new();
        store.set_snapshot(ZONE, json!({ "ph": 6.1 }), ts(100));

        assert_eq!(
            store.observe(ZONE, ts(90), None),
            Observation::Stale { baseline: ts(100) }
        );
        assert_eq!(
            store.observe(ZONE, ts(110), None),
            Observation::Accepted {
                previous: Some(ts(100))
            }
        );
        assert!(store.observe(ZONE, ts(105), None).is_stale());

        let cached = store.get(ZONE).unwrap();
        assert_eq!(cached.server_ts, ts(110));
        assert_eq!(*cached.state, json!({ "ph": 6.1 }));
        assert_eq!(cached.source, SnapshotSource::Event);
    }

    #[test]
    fn equal_timestamp_is_stale() {
        let store = SnapshotRegistry::new();
        store.set_snapshot(ZONE, json!({}), ts(100));
        assert!(store.is_stale(ZONE, Some(ts(100))));
        assert!(!store.is_stale(ZONE, None));
        assert!(!store.is_stale(EntityId::new(8), Some(ts(1))));
    }

    #[test]
    fn untracked_zone_is_not_created_by_delta_events() {
        let store = SnapshotRegistry::new();
        assert_eq!(store.observe(ZONE, ts(5), None), Observation::Untracked);
        assert!(!store.contains(ZONE));

        let full = json!({ "ec": 1.8 });
        assert_eq!(
            store.observe(ZONE, ts(5), Some(&full)),
            Observation::Accepted { previous: None }
        );
        assert_eq!(*store.get(ZONE).unwrap().state, full);
    }

    #[test]
    fn explicit_fetch_always_wins() {
        let store = SnapshotRegistry::new();
        store.set_snapshot(ZONE, json!({ "v": 1 }), ts(200));
        store.set_snapshot(ZONE, json!({ "v": 2 }), ts(150));
        let cached = store.get(ZONE).unwrap();
        assert_eq!(cached.server_ts, ts(150));
        assert_eq!(cached.source, SnapshotSource::Fetched);
    }

    #[test]
    fn changes_bump_version() {
        let store = SnapshotRegistry::new();
        let mut rx = store.subscribe();
        assert_eq!(store.version(), 0);

        store.set_snapshot(ZONE, json!({}), ts(1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);

        store.observe(ZONE, ts(0), None);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn change_stream_yields_current_version() {
        use tokio_stream::StreamExt;

        let store = SnapshotRegistry::new();
        store.set_snapshot(ZONE, json!({}), ts(1));
        let mut changes = Box::pin(store.changes());
        assert_eq!(changes.next().await, Some(1));
    }
}
