// ── Normalized realtime events ──
//
// Raw transport events are normalized once, at the channel boundary, into a
// tagged union keyed by topic kind. Handlers match on it exhaustively and
// the reconciliation layer only ever looks at `entity()` / `server_ts()`.

use serde::Serialize;
use serde_json::Value;

use greenlink_api::{EntityId, PushEvent, ServerTimestamp};

use crate::topic::{Topic, TopicKind};

/// Event name carrying a complete zone state rather than a delta.
pub const FULL_STATE_EVENT: &str = "ZoneSnapshot";

/// A command-status event on a zone channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneCommandEvent {
    pub zone: EntityId,
    /// Transport event name, e.g. `"CommandStatusUpdated"`.
    pub name: String,
    pub command_id: Option<String>,
    pub status: Option<String>,
    pub server_ts: Option<ServerTimestamp>,
    pub payload: Value,
}

impl ZoneCommandEvent {
    /// Whether the payload carries the full zone state under `state`.
    pub fn is_full_state(&self) -> bool {
        self.name == FULL_STATE_EVENT && self.payload.get("state").is_some()
    }
}

/// An event on the global channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalEvent {
    pub name: String,
    /// Zone the event refers to, if any.
    pub zone: Option<EntityId>,
    pub server_ts: Option<ServerTimestamp>,
    pub payload: Value,
}

/// Normalized inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RealtimeEvent {
    ZoneCommand(ZoneCommandEvent),
    Global(GlobalEvent),
}

impl RealtimeEvent {
    /// Normalize a transport event received on `topic`.
    pub fn from_push(topic: &Topic, push: &PushEvent) -> Self {
        let data = &push.data;
        match topic.kind() {
            TopicKind::Scoped { entity } => Self::ZoneCommand(ZoneCommandEvent {
                zone: entity,
                name: push.event.clone(),
                command_id: string_field(data, &["command_id", "commandId", "id"]),
                status: string_field(data, &["status"]),
                server_ts: timestamp_field(data),
                payload: data.clone(),
            }),
            TopicKind::Global => Self::Global(GlobalEvent {
                name: push.event.clone(),
                zone: entity_field(data),
                server_ts: timestamp_field(data),
                payload: data.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::ZoneCommand(e) => &e.name,
            Self::Global(e) => &e.name,
        }
    }

    /// Entity the event is about, used for reconciliation.
    pub fn entity(&self) -> Option<EntityId> {
        match self {
            Self::ZoneCommand(e) => Some(e.zone),
            Self::Global(e) => e.zone,
        }
    }

    pub fn server_ts(&self) -> Option<ServerTimestamp> {
        match self {
            Self::ZoneCommand(e) => e.server_ts,
            Self::Global(e) => e.server_ts,
        }
    }

    /// Full zone state carried by the event, if it is a snapshot event.
    pub fn full_state(&self) -> Option<&Value> {
        match self {
            Self::ZoneCommand(e) if e.is_full_state() => e.payload.get("state"),
            _ => None,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            Self::ZoneCommand(e) => &e.payload,
            Self::Global(e) => &e.payload,
        }
    }
}

// ── Payload field helpers ────────────────────────────────────────────

fn string_field(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match data.get(*k)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts integers, floats (truncated) or numeric strings.
fn timestamp_field(data: &Value) -> Option<ServerTimestamp> {
    ["server_ts", "serverTs", "server_timestamp"]
        .iter()
        .find_map(|k| {
            let raw = data.get(*k)?;
            let ts = timestamp_value(raw);
            if ts.is_none() {
                tracing::debug!(field = *k, value = %raw, "ignoring unparseable server timestamp");
            }
            ts
        })
        .map(ServerTimestamp::new)
}

#[allow(clippy::cast_possible_truncation)]
fn timestamp_value(raw: &Value) -> Option<i64> {
    let float = |f: f64| f.is_finite().then(|| f.trunc() as i64);
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float))
        }
        _ => None,
    }
}

fn entity_field(data: &Value) -> Option<EntityId> {
    ["zone_id", "zoneId"].iter().find_map(|k| {
        let v = data.get(*k)?;
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .map(EntityId::new)
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::topic::AuthMode;

    fn push(event: &str, data: Value) -> PushEvent {
        PushEvent {
            channel: "test".into(),
            event: event.into(),
            data,
        }
    }

    #[test]
    fn zone_event_takes_entity_from_topic() {
        let topic = Topic::zone_commands("commands", EntityId::new(7));
        let evt = RealtimeEvent::from_push(
            &topic,
            &push(
                "CommandStatusUpdated",
                json!({ "command_id": 55, "status": "acked", "server_ts": 110, "zone_id": 99 }),
            ),
        );
        assert_eq!(evt.entity(), Some(EntityId::new(7)));
        assert_eq!(evt.server_ts(), Some(ServerTimestamp::new(110)));
        match evt {
            RealtimeEvent::ZoneCommand(e) => {
                assert_eq!(e.command_id.as_deref(), Some("55"));
                assert_eq!(e.status.as_deref(), Some("acked"));
            }
            RealtimeEvent::Global(_) => panic!("expected zone event"),
        }
    }

    #[test]
    fn global_event_reads_optional_zone() {
        let topic = Topic::global("events.global", AuthMode::Public);
        let with_zone =
            RealtimeEvent::from_push(&topic, &push("AlertRaised", json!({ "zoneId": "4", "serverTs": 5 })));
        assert_eq!(with_zone.entity(), Some(EntityId::new(4)));
        assert_eq!(with_zone.server_ts(), Some(ServerTimestamp::new(5)));

        let bare = RealtimeEvent::from_push(&topic, &push("EventCreated", json!({ "msg": "hi" })));
        assert_eq!(bare.entity(), None);
        assert_eq!(bare.server_ts(), None);
    }

    #[test]
    fn only_snapshot_events_carry_full_state() {
        let topic = Topic::zone_commands("commands", EntityId::new(1));
        let snap = RealtimeEvent::from_push(
            &topic,
            &push(FULL_STATE_EVENT, json!({ "state": { "ph": 6.0 }, "server_ts": 3 })),
        );
        assert_eq!(snap.full_state(), Some(&json!({ "ph": 6.0 })));

        let delta = RealtimeEvent::from_push(
            &topic,
            &push("CommandStatusUpdated", json!({ "state": { "ph": 6.0 } })),
        );
        assert!(delta.full_state().is_none());
    }

    #[test]
    fn server_timestamp_accepts_float_and_string_encodings() {
        let topic = Topic::zone_commands("commands", EntityId::new(1));
        let ts = |data: Value| {
            RealtimeEvent::from_push(&topic, &push("CommandStatusUpdated", data)).server_ts()
        };

        assert_eq!(ts(json!({ "server_ts": 1_700.9 })), Some(ServerTimestamp::new(1_700)));
        assert_eq!(ts(json!({ "serverTs": "1700" })), Some(ServerTimestamp::new(1_700)));
        assert_eq!(ts(json!({ "server_timestamp": " 42.5 " })), Some(ServerTimestamp::new(42)));
        assert_eq!(ts(json!({ "server_ts": "soon" })), None);
        assert_eq!(ts(json!({ "server_ts": true })), None);
    }

    #[test]
    fn unparseable_timestamp_falls_through_to_next_key() {
        let topic = Topic::zone_commands("commands", EntityId::new(1));
        let event = RealtimeEvent::from_push(
            &topic,
            &push("CommandStatusUpdated", json!({ "server_ts": null, "serverTs": 9 })),
        );
        assert_eq!(event.server_ts(), Some(ServerTimestamp::new(9)));
    }
}
