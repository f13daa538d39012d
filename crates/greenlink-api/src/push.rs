//! Push transport interface.
//!
//! The greenhouse backend publishes command and telemetry events over a
//! Pusher-protocol socket. This module describes the slice of that transport
//! the multiplexer depends on: opening private and public channels, binding
//! and unbinding event listeners, leaving channels, and observing connection
//! state. Connecting and authenticating the socket itself is the
//! implementation's business.
//!
//! Private channel authorization is asynchronous: `create_private_channel`
//! hands back a handle immediately and the outcome arrives later as a
//! [`SUBSCRIPTION_SUCCEEDED`] or [`SUBSCRIPTION_ERROR`] event on that channel.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Emitted on a channel once the transport confirms the subscription.
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher:subscription_succeeded";

/// Emitted on a channel when the authorization handshake is rejected.
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";

// ── Handles ──────────────────────────────────────────────────────────

/// Opaque handle to a channel opened on the transport.
///
/// Two handles for the same channel name are distinct if they were
/// created by different `create_*_channel` calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    id: u64,
    name: Arc<str>,
}

impl ChannelHandle {
    pub fn new(id: u64, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Identifies one listener registration, for `unbind` / `off_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

// ── Events & state ───────────────────────────────────────────────────

/// A raw event as delivered by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Channel the event was published on.
    pub channel: String,

    /// Event name, e.g. `"CommandStatusUpdated"`.
    pub event: String,

    /// Decoded JSON payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Socket connection state, mirroring the Pusher state machine.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Initialized,
    Connecting,
    Connected,
    Unavailable,
    Failed,
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Listener invoked for every matching event on a bound channel.
pub type EventListener = Arc<dyn Fn(&PushEvent) + Send + Sync>;

/// Listener invoked on every connection state transition.
pub type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

// ── PushTransport ────────────────────────────────────────────────────

/// The push-event transport consumed by the multiplexer.
///
/// All methods are synchronous and must not block; listeners are invoked
/// on the caller's thread. Implementations must not hold internal locks
/// while invoking listeners, since listeners re-enter the transport.
pub trait PushTransport: Send + Sync {
    /// Whether a connection exists that channels can be opened on.
    fn is_available(&self) -> bool;

    /// Open a private channel, starting its authorization handshake.
    fn create_private_channel(&self, name: &str) -> Result<ChannelHandle, Error>;

    /// Open a public channel. No handshake is involved.
    fn create_public_channel(&self, name: &str) -> Result<ChannelHandle, Error>;

    /// Bind `listener` to `event` on `handle`.
    fn bind(&self, handle: &ChannelHandle, event: &str, listener: EventListener) -> ListenerId;

    /// Remove a listener previously returned by [`bind`](Self::bind).
    fn unbind(&self, handle: &ChannelHandle, event: &str, listener: ListenerId);

    /// Leave the channel. Any remaining listeners are dropped.
    fn leave(&self, handle: &ChannelHandle);

    /// Register a connection state listener.
    fn on_connection_state_change(&self, listener: StateListener) -> ListenerId;

    /// Remove a connection state listener.
    fn off_connection_state_change(&self, listener: ListenerId);
}
