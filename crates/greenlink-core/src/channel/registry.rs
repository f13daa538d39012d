// ── Channel registry ──
//
// Topic name -> { control, attached subscriptions }. The subscriber set is
// an explicit map rather than a counter, so the last detach is the only
// thing that can tear a channel down. An entry with no subscribers exists
// only between `ensure_channel` and the `attach` that follows it.

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use indexmap::IndexMap;

use greenlink_api::{EntityId, PushTransport};

use super::{ChannelControl, ChannelSink, ChannelState};
use crate::subscription::{Subscription, SubscriptionId};
use crate::topic::{Topic, TopicName};

struct RegistryEntry {
    control: Arc<ChannelControl>,
    subscribers: IndexMap<SubscriptionId, Arc<Subscription>>,
}

/// Result of a successful [`ChannelRegistry::ensure_channel`].
#[derive(Debug, Clone)]
pub struct Ensured {
    pub control: Arc<ChannelControl>,
    /// A transport channel was created by this call.
    pub created: bool,
}

/// Result of [`ChannelRegistry::detach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detach {
    /// The id was not attached anywhere.
    NotAttached,
    /// Removed; other subscribers remain on the channel.
    Detached,
    /// Removed the last subscriber and tore the channel down.
    TornDown(TopicName),
}

/// Registry of channel controls and their attached subscriptions.
#[derive(Default)]
pub struct ChannelRegistry {
    entries: DashMap<TopicName, RegistryEntry>,
    index: DashMap<SubscriptionId, TopicName>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a usable control for `topic`, creating it on the transport
    /// if needed.
    ///
    /// An existing control that is live on the current connection is
    /// returned unchanged. A dead or stale one is rebuilt in place, keeping
    /// its subscribers. Returns `None` when the transport is unavailable.
    /// A rejected handshake still returns the (dead) control.
    pub(crate) fn ensure_channel(
        &self,
        topic: &Topic,
        transport: &dyn PushTransport,
        sink: &Weak<dyn ChannelSink>,
        epoch: u64,
    ) -> Option<Ensured> {
        let existing = self.entries.get(topic.name()).map(|e| e.control.clone());
        if let Some(control) = existing {
            if control.is_usable(epoch) {
                tracing::debug!(topic = %topic.name(), state = %control.state(), "reusing channel");
                return Some(Ensured {
                    control,
                    created: false,
                });
            }
            if !transport.is_available() {
                return None;
            }
            return match control.materialize(transport, sink, epoch) {
                Err(e) if e.is_unavailable() => None,
                Err(e) => {
                    tracing::warn!(topic = %topic.name(), error = %e, "channel recreation failed");
                    Some(Ensured {
                        control,
                        created: true,
                    })
                }
                Ok(()) => Some(Ensured {
                    control,
                    created: true,
                }),
            };
        }

        if !transport.is_available() {
            return None;
        }

        let control = Arc::new(ChannelControl::new(topic.clone()));
        match self.entries.entry(topic.name().clone()) {
            Entry::Occupied(occupied) => {
                return Some(Ensured {
                    control: occupied.get().control.clone(),
                    created: false,
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(RegistryEntry {
                    control: control.clone(),
                    subscribers: IndexMap::new(),
                });
            }
        }

        match control.materialize(transport, sink, epoch) {
            Ok(()) => Some(Ensured {
                control,
                created: true,
            }),
            Err(e) if e.is_unavailable() => {
                self.entries.remove_if(topic.name(), |_, entry| {
                    Arc::ptr_eq(&entry.control, &control) && entry.subscribers.is_empty()
                });
                None
            }
            Err(e) => {
                tracing::warn!(topic = %topic.name(), error = %e, "channel authorization failed");
                Some(Ensured {
                    control,
                    created: true,
                })
            }
        }
    }

    /// Attach `subscription` to the entry for its topic, making it live.
    ///
    /// If the entry vanished since `ensure_channel` (its last subscriber
    /// left in between), it is re-registered with `control`. Returns the
    /// control the subscription ended up on.
    pub fn attach(
        &self,
        control: &Arc<ChannelControl>,
        subscription: Arc<Subscription>,
    ) -> Arc<ChannelControl> {
        let name = subscription.topic.name().clone();
        let id = subscription.id;
        let attached = {
            let mut entry = self
                .entries
                .entry(name.clone())
                .or_insert_with(|| RegistryEntry {
                    control: control.clone(),
                    subscribers: IndexMap::new(),
                });
            entry.subscribers.insert(id, subscription);
            entry.control.clone()
        };
        self.index.insert(id, name);
        attached
    }

    /// Detach a subscription. Tearing down happens outside any map guard.
    pub fn detach(&self, id: SubscriptionId, transport: Option<&dyn PushTransport>) -> Detach {
        let Some((_, name)) = self.index.remove(&id) else {
            return Detach::NotAttached;
        };

        let removed = self.entries.remove_if_mut(&name, |_, entry| {
            entry.subscribers.shift_remove(&id);
            entry.subscribers.is_empty()
        });

        match removed {
            Some((_, entry)) => {
                entry.control.teardown(transport);
                tracing::debug!(topic = %name, subscription = %id, "last subscriber left, channel torn down");
                Detach::TornDown(name)
            }
            None => {
                tracing::debug!(topic = %name, subscription = %id, "subscription detached");
                Detach::Detached
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn control(&self, name: &str) -> Option<Arc<ChannelControl>> {
        self.entries.get(name).map(|e| e.control.clone())
    }

    /// Copy of the subscribers attached to `name`, in attach order.
    pub fn subscribers(&self, name: &str) -> Vec<Arc<Subscription>> {
        self.entries
            .get(name)
            .map(|e| e.subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, |e| e.subscribers.len())
    }

    pub fn is_attached(&self, id: SubscriptionId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn controls(&self) -> Vec<Arc<ChannelControl>> {
        self.entries.iter().map(|e| e.control.clone()).collect()
    }

    pub fn channel_count(&self) -> usize {
        self.entries.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.index.len()
    }

    /// Channels currently in `state`.
    pub fn count_in_state(&self, state: ChannelState) -> usize {
        self.entries
            .iter()
            .filter(|e| e.control.state() == state)
            .count()
    }

    /// Zones with at least one attached subscription that asked for
    /// reconciliation.
    pub fn reconciled_entities(&self) -> Vec<EntityId> {
        let mut entities: Vec<EntityId> = self
            .entries
            .iter()
            .filter(|e| e.subscribers.values().any(|s| s.options.reconcile))
            .filter_map(|e| e.control.topic().entity())
            .collect();
        entities.sort();
        entities.dedup();
        entities
    }

    /// Tear every channel down and forget all subscriptions.
    pub fn reset(&self, transport: Option<&dyn PushTransport>) -> usize {
        let names: Vec<TopicName> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut torn_down = 0;
        for name in names {
            if let Some((_, entry)) = self.entries.remove(&name) {
                entry.control.teardown(transport);
                torn_down += 1;
            }
        }
        self.index.clear();
        torn_down
    }
}
