// ── Pending subscription queue ──
//
// Requests made while no transport is available wait here until a flush
// can materialize them. Entries are removable by id at any time, including
// while a flush is converting them.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::{EventHandler, OwnerId, SubscribeOptions, Subscription, SubscriptionId};
use crate::topic::Topic;

/// A subscription request waiting for a transport.
#[derive(Debug, Clone)]
pub struct PendingSubscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub owner: OwnerId,
    pub handler: EventHandler,
    pub options: SubscribeOptions,
    pub created_at: DateTime<Utc>,
}

impl PendingSubscription {
    pub fn into_subscription(self) -> Subscription {
        Subscription {
            id: self.id,
            topic: self.topic,
            owner: self.owner,
            handler: self.handler,
            options: self.options,
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries turned into live subscriptions.
    pub materialized: usize,
    /// Entries cancelled while they were being materialized.
    pub orphaned: usize,
    /// Entries still queued.
    pub remaining: usize,
}

/// FIFO of pending subscriptions keyed by id.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: Mutex<IndexMap<SubscriptionId, PendingSubscription>>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<SubscriptionId, PendingSubscription>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, pending: PendingSubscription) -> SubscriptionId {
        let id = pending.id;
        tracing::debug!(
            topic = %pending.topic.name(),
            owner = %pending.owner,
            subscription = %id,
            "queued subscription until transport is available"
        );
        self.lock().insert(id, pending);
        id
    }

    /// Remove an entry without side effects.
    pub fn cancel(&self, id: SubscriptionId) -> Option<PendingSubscription> {
        self.lock().shift_remove(&id)
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Try to materialize every queued entry, oldest first.
    ///
    /// `materialize` is called without the queue lock held and returns
    /// `true` when the entry became a live subscription. Successful entries
    /// leave the queue; the rest stay for the next flush. If an entry was
    /// cancelled while `materialize` ran, the new live subscription is
    /// handed to `orphan` to be detached again.
    pub fn flush<M, O>(&self, mut materialize: M, mut orphan: O) -> FlushReport
    where
        M: FnMut(&PendingSubscription) -> bool,
        O: FnMut(SubscriptionId),
    {
        let snapshot: Vec<PendingSubscription> = self.lock().values().cloned().collect();
        let mut report = FlushReport::default();

        for entry in snapshot {
            if !self.contains(entry.id) {
                continue;
            }
            if !materialize(&entry) {
                continue;
            }
            if self.cancel(entry.id).is_some() {
                let waited = Utc::now() - entry.created_at;
                tracing::debug!(
                    subscription = %entry.id,
                    waited_ms = waited.num_milliseconds(),
                    "pending entry materialized"
                );
                report.materialized += 1;
            } else {
                tracing::debug!(subscription = %entry.id, "pending entry cancelled during flush");
                orphan(entry.id);
                report.orphaned += 1;
            }
        }

        report.remaining = self.len();
        report
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let n = entries.len();
        entries.clear();
        n
    }
}
