// ── Channel layer ──
//
// One `ChannelControl` per topic owns the transport handle and listener
// bindings. The `ChannelRegistry` maps topic names to controls plus the
// set of logical subscriptions attached to each, and `GlobalChannels`
// tracks authorization of the singleton global topics.

pub mod control;
pub mod global;
pub mod registry;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::Serialize;

use greenlink_api::{PushEvent, PushTransport};

pub use control::ChannelControl;
pub use global::{GlobalChannels, GlobalStatus};
pub use registry::{ChannelRegistry, Detach, Ensured};

/// Liveness of a channel control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    /// Created on the transport, authorization handshake in flight.
    Pending,
    /// Bound and listening.
    Active,
    /// Torn down or rejected. Eligible for recreation.
    Dead,
}

/// Receives what a control's transport listeners observe.
///
/// Implemented by the realtime service. Called on the transport's thread
/// with no internal locks held.
pub(crate) trait ChannelSink: Send + Sync {
    fn on_event(&self, control: &Arc<ChannelControl>, push: &PushEvent);
    fn on_authorized(&self, control: &Arc<ChannelControl>);
    fn on_authorization_failed(&self, control: &Arc<ChannelControl>, reason: &str);
}

// ── Transport slot ───────────────────────────────────────────────────

/// Holds the push transport once the application has created one.
#[derive(Default)]
pub struct TransportSlot {
    inner: ArcSwapOption<Arc<dyn PushTransport>>,
}

impl TransportSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `transport`. Returns `true` if the slot was empty before.
    pub fn install(&self, transport: Arc<dyn PushTransport>) -> bool {
        self.inner.swap(Some(Arc::new(transport))).is_none()
    }

    pub fn clear(&self) -> Option<Arc<dyn PushTransport>> {
        self.inner.swap(None).map(|t| Arc::clone(&*t))
    }

    pub fn get(&self) -> Option<Arc<dyn PushTransport>> {
        self.inner.load_full().map(|t| Arc::clone(&*t))
    }

    /// The installed transport, if it currently has a connection.
    pub fn available(&self) -> Option<Arc<dyn PushTransport>> {
        self.get().filter(|t| t.is_available())
    }
}

#[cfg(test)]
mod tests {
    use greenlink_api::MemoryTransport;

    use super::*;

    #[test]
    fn slot_reports_availability_of_installed_transport() {
        let slot = TransportSlot::new();
        assert!(slot.get().is_none());

        let transport = Arc::new(MemoryTransport::offline());
        assert!(slot.install(transport.clone()));
        assert!(slot.get().is_some());
        assert!(slot.available().is_none());

        transport.connect();
        assert!(slot.available().is_some());

        assert!(!slot.install(Arc::new(MemoryTransport::new())));
        assert!(slot.clear().is_some());
        assert!(slot.get().is_none());
    }
}
