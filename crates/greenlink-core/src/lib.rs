//! Realtime subscription multiplexer for greenlink.
//!
//! Many views subscribe to a handful of push topics (one command channel
//! per growing zone, plus a global event stream). This crate sits between
//! them and the push transport:
//!
//! - **Channel control / registry**: one transport channel per topic, shared
//!   by every subscriber and torn down with the last one.
//! - **Pending queue**: subscriptions made before a transport exists are
//!   queued and materialized once one connects.
//! - **Snapshot registry**: per-zone authoritative state with a server
//!   timestamp; push events at or below it are dropped as stale.
//! - **Resubscribe manager**: after a reconnect, every channel is rebuilt
//!   once (debounced) without callers re-registering.
//! - **[`Realtime`] / [`OwnerScope`]**: the service and the per-owner facade
//!   that releases everything an owner subscribed to in one call.
//!
//! Nothing on the subscribe / unsubscribe surface returns an error: without a
//! transport requests queue, rejected channels go dead and are retried
//! later, and handler failures are logged and contained.

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod notify;
pub mod realtime;
pub mod resubscribe;
pub mod store;
pub mod subscription;
pub mod timer;
pub mod topic;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::RealtimeConfig;
pub use error::CoreError;
pub use realtime::{OwnerScope, Realtime, RealtimeStats, SubscriptionRequest, Unsubscribe};

// ── Domain types ────────────────────────────────────────────────────
pub use channel::{ChannelControl, ChannelState, GlobalStatus};
pub use event::{FULL_STATE_EVENT, GlobalEvent, RealtimeEvent, ZoneCommandEvent};
pub use notify::{Toast, ToastLevel, ToastSink};
pub use resubscribe::ResubscribeReport;
pub use store::{CachedSnapshot, Observation, SnapshotRegistry, SnapshotSource};
pub use subscription::{
    EventHandler, FlushReport, HandlerResult, OwnerId, SubscribeOptions, SubscribeOutcome,
    SubscriptionId,
};
pub use topic::{AuthMode, Topic, TopicKind, TopicName};

// ── Collaborators ───────────────────────────────────────────────────
pub use greenlink_api::{
    ConnectionState, EntityId, EntitySnapshot, MemoryTransport, PushEvent, PushTransport,
    ServerTimestamp, SnapshotFetcher,
};
