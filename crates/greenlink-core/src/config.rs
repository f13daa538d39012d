// ── Runtime multiplexer configuration ──
//
// Tuning for the realtime layer. Never touches disk: greenlink-config
// (or the embedding application) builds one and hands it in.

use std::time::Duration;

use crate::topic::AuthMode;

/// Configuration for a [`Realtime`](crate::Realtime) service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Quiet period after a reconnect before channels are rebuilt.
    /// Reconnect notifications inside the window coalesce into one rebuild.
    pub resubscribe_debounce: Duration,

    /// How often the pending queue re-checks for a transport.
    pub pending_poll_interval: Duration,

    /// Polls before giving up and raising the unavailability notice.
    /// `None` polls forever.
    pub pending_max_polls: Option<u32>,

    /// Re-fetch snapshots of reconciled zones after every reconnect.
    pub resync_snapshots_on_reconnect: bool,

    /// Channel name of the global event stream.
    pub global_topic: String,

    /// Authorization mode of the global event stream.
    pub global_auth: AuthMode,

    /// Prefix of per-zone command channels (`{prefix}.{zone}`).
    pub zone_topic_prefix: String,

    /// Text of the single notice shown when the transport stays unavailable.
    pub unavailable_message: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            resubscribe_debounce: Duration::from_millis(250),
            pending_poll_interval: Duration::from_secs(1),
            pending_max_polls: Some(60),
            resync_snapshots_on_reconnect: true,
            global_topic: "events.global".into(),
            global_auth: AuthMode::Private,
            zone_topic_prefix: "commands".into(),
            unavailable_message: "Live updates are unavailable. Retrying in the background."
                .into(),
        }
    }
}

impl RealtimeConfig {
    /// Total time the pending queue polls before giving up, if bounded.
    pub fn pending_poll_budget(&self) -> Option<Duration> {
        self.pending_max_polls
            .map(|polls| self.pending_poll_interval.saturating_mul(polls))
    }
}
