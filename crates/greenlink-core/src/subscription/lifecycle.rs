// ── Subscription lifecycle ──
//
// Attaches logical subscriptions to channel controls, queues them when the
// transport is missing, and releases them one at a time or per owner. Per
// owner bookkeeping keeps owner teardown proportional to what that owner
// holds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashMap;
use indexmap::IndexSet;

use greenlink_api::PushTransport;

use super::{
    EventHandler, FlushReport, OwnerId, PendingQueue, PendingSubscription, SubscribeOptions,
    Subscription, SubscriptionId,
};
use crate::channel::{ChannelRegistry, ChannelSink, ChannelState, Detach, GlobalChannels};
use crate::notify::{Toast, ToastLevel};
use crate::topic::Topic;

/// What the lifecycle needs from the service to reach the transport.
pub(crate) struct Link<'a> {
    /// The transport, if one is installed.
    pub transport: Option<&'a dyn PushTransport>,
    pub sink: &'a Weak<dyn ChannelSink>,
    /// Current connection epoch.
    pub epoch: u64,
}

/// Where a new subscription ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Attached to a channel control in the given state.
    Live {
        id: SubscriptionId,
        state: ChannelState,
    },
    /// Waiting in the pending queue.
    Queued { id: SubscriptionId },
}

impl SubscribeOutcome {
    pub fn id(self) -> SubscriptionId {
        match self {
            Self::Live { id, .. } | Self::Queued { id } => id,
        }
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// Owns the registries and the per-owner index.
#[derive(Default)]
pub struct SubscriptionLifecycle {
    registry: ChannelRegistry,
    pending: PendingQueue,
    globals: GlobalChannels,
    owners: DashMap<OwnerId, IndexSet<SubscriptionId>>,
    next_id: AtomicU64,
}

impl SubscriptionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    pub fn globals(&self) -> &GlobalChannels {
        &self.globals
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    // ── Subscribe ────────────────────────────────────────────────────

    /// Attach a new subscription, or queue it if there is no transport.
    pub(crate) fn subscribe(
        &self,
        link: &Link<'_>,
        topic: Topic,
        owner: OwnerId,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> SubscribeOutcome {
        let id = self.next_id();
        self.owners.entry(owner).or_default().insert(id);

        let subscription = Subscription {
            id,
            topic,
            owner,
            handler,
            options,
        };
        if let Some(state) = self.try_attach(link, &subscription) {
            return SubscribeOutcome::Live { id, state };
        }

        self.pending.enqueue(PendingSubscription {
            id,
            topic: subscription.topic,
            owner,
            handler: subscription.handler,
            options: subscription.options,
            created_at: Utc::now(),
        });
        SubscribeOutcome::Queued { id }
    }

    /// Make `subscription` live if the transport allows it. Returns the
    /// state of the control it was attached to.
    fn try_attach(&self, link: &Link<'_>, subscription: &Subscription) -> Option<ChannelState> {
        let transport = link.transport.filter(|t| t.is_available())?;
        let topic = &subscription.topic;

        let ensured = self
            .registry
            .ensure_channel(topic, transport, link.sink, link.epoch)?;
        if topic.kind().is_global() {
            if ensured.created {
                self.globals.record(topic.name(), ensured.control.state());
            } else {
                self.globals.join(topic.name());
            }
        }

        let control = self
            .registry
            .attach(&ensured.control, Arc::new(subscription.clone()));
        let state = control.state();

        if state == ChannelState::Dead {
            let reason = control
                .failure()
                .unwrap_or_else(|| "channel unavailable".to_owned());
            tracing::warn!(
                topic = %topic.name(),
                owner = %subscription.owner,
                subscription = %subscription.id,
                reason = %reason,
                "subscribed to a channel that failed authorization"
            );
            if let Some(sink) = &subscription.options.toast {
                sink.toast(&authorization_toast(topic, &reason));
            }
        }
        Some(state)
    }

    // ── Release ──────────────────────────────────────────────────────

    /// Cancel a pending entry or detach a live subscription. Unknown ids
    /// are a no-op. Returns whether anything was released.
    pub(crate) fn unsubscribe(
        &self,
        id: SubscriptionId,
        owner: OwnerId,
        transport: Option<&dyn PushTransport>,
    ) -> bool {
        let released = self.release(id, transport);
        if released {
            self.owners.remove_if_mut(&owner, |_, ids| {
                ids.shift_remove(&id);
                ids.is_empty()
            });
        }
        released
    }

    fn release(&self, id: SubscriptionId, transport: Option<&dyn PushTransport>) -> bool {
        if self.pending.cancel(id).is_some() {
            tracing::debug!(subscription = %id, "pending subscription cancelled");
            return true;
        }
        match self.registry.detach(id, transport) {
            Detach::NotAttached => false,
            Detach::Detached => true,
            Detach::TornDown(name) => {
                self.globals.remove(name.as_str());
                true
            }
        }
    }

    /// Release every pending and live subscription of `owner`.
    pub(crate) fn teardown_owner(
        &self,
        owner: OwnerId,
        transport: Option<&dyn PushTransport>,
    ) -> usize {
        let Some((_, ids)) = self.owners.remove(&owner) else {
            return 0;
        };
        let released = ids
            .into_iter()
            .filter(|id| self.release(*id, transport))
            .count();
        tracing::debug!(owner = %owner, released, "owner torn down");
        released
    }

    // ── Flush ────────────────────────────────────────────────────────

    /// Materialize queued subscriptions that can be attached now.
    pub(crate) fn flush_pending(&self, link: &Link<'_>) -> FlushReport {
        if self.pending.is_empty() {
            return FlushReport::default();
        }
        let report = self.pending.flush(
            |entry| {
                let subscription = entry.clone().into_subscription();
                self.try_attach(link, &subscription).is_some()
            },
            |id| {
                self.registry.detach(id, link.transport);
            },
        );
        if report.materialized > 0 || report.orphaned > 0 {
            tracing::info!(
                materialized = report.materialized,
                orphaned = report.orphaned,
                remaining = report.remaining,
                "flushed pending subscriptions"
            );
        }
        report
    }

    // ── Introspection ────────────────────────────────────────────────

    /// Ids currently held by `owner`, pending or live.
    pub fn owned(&self, owner: OwnerId) -> Vec<SubscriptionId> {
        self.owners
            .get(&owner)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    pub fn is_live(&self, id: SubscriptionId) -> bool {
        self.registry.is_attached(id)
    }

    pub fn is_pending(&self, id: SubscriptionId) -> bool {
        self.pending.contains(id)
    }

    /// Drop everything: channels, queue, owners, global tracking.
    pub(crate) fn reset(&self, transport: Option<&dyn PushTransport>) {
        let channels = self.registry.reset(transport);
        let pending = self.pending.clear();
        self.globals.reset();
        self.owners.clear();
        tracing::debug!(channels, pending, "subscription lifecycle reset");
    }
}

pub(crate) fn authorization_toast(topic: &Topic, reason: &str) -> Toast {
    Toast::new(
        ToastLevel::Error,
        "Live updates",
        format!("Could not subscribe to {}: {reason}", topic.name()),
    )
}
