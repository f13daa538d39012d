// ── Logical subscriptions ──
//
// A subscription is one caller's interest in a topic: the handler to call,
// the owner it belongs to for bulk teardown, and per-subscription options.
// It never holds transport state; that lives in the channel control the
// subscription is attached to.

pub mod lifecycle;
pub mod pending;

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::RealtimeEvent;
use crate::notify::ToastSink;
use crate::topic::Topic;

pub use lifecycle::{SubscribeOutcome, SubscriptionLifecycle};
pub use pending::{FlushReport, PendingQueue, PendingSubscription};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique, monotonically assigned subscription id. Pending entries keep
/// the id they will have once materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Groups the subscriptions of one logical consumer, typically one mounted
/// view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

/// What a handler returns. Errors are logged, never propagated.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Callback invoked with every delivered event.
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&RealtimeEvent) -> HandlerResult + Send + Sync>);

impl EventHandler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RealtimeEvent) -> HandlerResult + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap a handler that cannot fail.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        Self::new(move |event| {
            f(event);
            Ok(())
        })
    }

    /// Call the handler, containing errors and panics. Returns `false` if
    /// the handler failed.
    pub(crate) fn invoke(&self, event: &RealtimeEvent, subscription: &Subscription) -> bool {
        match catch_unwind(AssertUnwindSafe(|| (self.0)(event))) {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(
                    topic = %subscription.topic.name(),
                    owner = %subscription.owner,
                    subscription = %subscription.id,
                    event = event.name(),
                    error = %e,
                    "event handler failed"
                );
                false
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                tracing::warn!(
                    topic = %subscription.topic.name(),
                    owner = %subscription.owner,
                    subscription = %subscription.id,
                    event = event.name(),
                    panic = %message,
                    "event handler panicked"
                );
                false
            }
        }
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler(..)")
    }
}

// ── Options ──────────────────────────────────────────────────────────

/// Per-subscription options.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Fetch the zone's snapshot and filter stale events against it.
    pub reconcile: bool,

    /// Receives a notice if the channel's authorization fails.
    pub toast: Option<Arc<dyn ToastSink>>,
}

impl SubscribeOptions {
    pub fn reconciled() -> Self {
        Self {
            reconcile: true,
            ..Self::default()
        }
    }

    pub fn with_toast(mut self, sink: Arc<dyn ToastSink>) -> Self {
        self.toast = Some(sink);
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("reconcile", &self.reconcile)
            .field("toast", &self.toast.is_some())
            .finish()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// A live logical subscription.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub topic: Topic,
    pub owner: OwnerId,
    pub handler: EventHandler,
    pub options: SubscribeOptions,
}
