// ── Global channel authorization ──
//
// The global topics are subscribed to by many owners at once during
// startup. This records, per global topic, whether its handshake is still
// in flight, so later subscribers can join the in-flight control instead
// of opening a second channel.

use dashmap::DashMap;
use serde::Serialize;

use super::ChannelState;
use crate::topic::TopicName;

/// Authorization status of a global topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GlobalStatus {
    Authorizing,
    Authorized,
    Failed,
}

impl From<ChannelState> for GlobalStatus {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Pending => Self::Authorizing,
            ChannelState::Active => Self::Authorized,
            ChannelState::Dead => Self::Failed,
        }
    }
}

#[derive(Debug, Clone)]
struct GlobalEntry {
    status: GlobalStatus,
    joined_in_flight: usize,
}

/// Tracks the global topics' authorization.
#[derive(Debug, Default)]
pub struct GlobalChannels {
    topics: DashMap<TopicName, GlobalEntry>,
}

impl GlobalChannels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the status implied by a control's state.
    pub fn record(&self, name: &TopicName, state: ChannelState) {
        let status = GlobalStatus::from(state);
        let mut entry = self.topics.entry(name.clone()).or_insert_with(|| GlobalEntry {
            status,
            joined_in_flight: 0,
        });
        if entry.status != status {
            tracing::debug!(topic = %name, from = %entry.status, to = %status, "global channel status");
            entry.status = status;
            if status == GlobalStatus::Authorizing {
                entry.joined_in_flight = 0;
            }
        }
    }

    /// A subscriber is attaching to an existing global control. Returns
    /// `true` if it joined while the handshake was still in flight.
    pub fn join(&self, name: &TopicName) -> bool {
        let Some(mut entry) = self.topics.get_mut(name) else {
            return false;
        };
        if entry.status != GlobalStatus::Authorizing {
            return false;
        }
        entry.joined_in_flight += 1;
        tracing::debug!(
            topic = %name,
            joined = entry.joined_in_flight,
            "joining in-flight global authorization"
        );
        true
    }

    pub fn status(&self, name: &str) -> Option<GlobalStatus> {
        self.topics.get(name).map(|e| e.status)
    }

    pub fn is_authorized(&self, name: &str) -> bool {
        self.status(name) == Some(GlobalStatus::Authorized)
    }

    /// Subscribers that joined during the current handshake.
    pub fn joined_in_flight(&self, name: &str) -> usize {
        self.topics.get(name).map_or(0, |e| e.joined_in_flight)
    }

    pub fn remove(&self, name: &str) {
        self.topics.remove(name);
    }

    pub fn reset(&self) {
        self.topics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_only_while_authorizing() {
        let globals = GlobalChannels::new();
        let name = TopicName::from("events.global");

        assert!(!globals.join(&name));

        globals.record(&name, ChannelState::Pending);
        assert!(globals.join(&name));
        assert!(globals.join(&name));
        assert_eq!(globals.joined_in_flight("events.global"), 2);

        globals.record(&name, ChannelState::Active);
        assert!(globals.is_authorized("events.global"));
        assert!(!globals.join(&name));
    }

    #[test]
    fn new_handshake_resets_join_count() {
        let globals = GlobalChannels::new();
        let name = TopicName::from("events.global");
        globals.record(&name, ChannelState::Pending);
        globals.join(&name);
        globals.record(&name, ChannelState::Dead);
        assert_eq!(globals.status("events.global"), Some(GlobalStatus::Failed));

        globals.record(&name, ChannelState::Pending);
        assert_eq!(globals.joined_in_flight("events.global"), 0);
    }
}
