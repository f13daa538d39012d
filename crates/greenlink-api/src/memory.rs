//! In-process [`PushTransport`].
//!
//! `MemoryTransport` keeps channels and listeners in memory and lets the
//! caller drive everything the real socket would: connection state
//! transitions, authorization outcomes, and published events. It records
//! how often each channel was created and left, which is what the
//! multiplexer's reference-counting guarantees are stated in terms of.
//!
//! Listeners are always invoked after the internal lock is released, so
//! they may call back into the transport.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::Error;
use crate::push::{
    ChannelHandle, ConnectionState, EventListener, ListenerId, PushEvent, PushTransport,
    StateListener, SUBSCRIPTION_ERROR, SUBSCRIPTION_SUCCEEDED,
};

/// Per-channel call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelCalls {
    pub private_creates: usize,
    pub public_creates: usize,
    pub leaves: usize,
}

impl ChannelCalls {
    pub fn creates(&self) -> usize {
        self.private_creates + self.public_creates
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Authorization {
    NotRequired,
    Pending,
    Granted,
    Denied,
}

struct Binding {
    id: ListenerId,
    event: String,
    listener: EventListener,
}

struct MemoryChannel {
    handle: ChannelHandle,
    authorization: Authorization,
    bindings: Vec<Binding>,
}

#[derive(Default)]
struct MemoryState {
    channels: HashMap<String, MemoryChannel>,
    state_listeners: Vec<(ListenerId, StateListener)>,
    calls: HashMap<String, ChannelCalls>,
    rejected: HashSet<String>,
    denied: HashSet<String>,
}

/// An in-memory push transport.
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
    connection: Mutex<ConnectionState>,
    auto_authorize: AtomicBool,
    next_id: AtomicU64,
}

impl MemoryTransport {
    /// A connected transport that authorizes private channels as soon as
    /// their outcome listeners are bound.
    pub fn new() -> Self {
        Self::with_state(ConnectionState::Connected)
    }

    /// A transport that has not connected yet.
    pub fn offline() -> Self {
        Self::with_state(ConnectionState::Initialized)
    }

    fn with_state(connection: ConnectionState) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            connection: Mutex::new(connection),
            auto_authorize: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // ── Connection control ───────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        *self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Transition to `next` and notify state listeners.
    ///
    /// Leaving the connected state drops every channel, as a real socket
    /// loses its subscriptions with the connection.
    pub fn set_connection_state(&self, next: ConnectionState) {
        {
            let mut current = self
                .connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if *current == next {
                return;
            }
            *current = next;
        }

        let listeners: Vec<StateListener> = {
            let mut state = self.lock();
            if !next.is_connected() {
                state.channels.clear();
            }
            state
                .state_listeners
                .iter()
                .map(|(_, l)| l.clone())
                .collect()
        };

        tracing::debug!(state = %next, listeners = listeners.len(), "memory transport state change");
        for listener in listeners {
            listener(next);
        }
    }

    pub fn connect(&self) {
        self.set_connection_state(ConnectionState::Connected);
    }

    pub fn disconnect(&self) {
        self.set_connection_state(ConnectionState::Disconnected);
    }

    // ── Authorization control ────────────────────────────────────────

    /// When disabled, private channels stay pending until
    /// [`resolve_authorization`](Self::resolve_authorization) is called.
    pub fn set_auto_authorize(&self, enabled: bool) {
        self.auto_authorize.store(enabled, Ordering::Relaxed);
    }

    /// Make `create_private_channel(name)` fail synchronously.
    pub fn reject(&self, name: &str) {
        self.lock().rejected.insert(name.to_owned());
    }

    /// Make the authorization handshake for `name` end in an error event.
    pub fn deny(&self, name: &str) {
        self.lock().denied.insert(name.to_owned());
    }

    /// Undo [`reject`](Self::reject) and [`deny`](Self::deny).
    pub fn allow(&self, name: &str) {
        let mut state = self.lock();
        state.rejected.remove(name);
        state.denied.remove(name);
    }

    /// Complete a pending handshake for `name`, emitting the outcome event.
    ///
    /// Returns `false` if the channel is not open or not pending.
    pub fn resolve_authorization(&self, name: &str) -> bool {
        let (event, listeners) = {
            let mut state = self.lock();
            let granted = !state.denied.contains(name);
            let Some(channel) = state.channels.get_mut(name) else {
                return false;
            };
            if channel.authorization != Authorization::Pending {
                return false;
            }
            channel.authorization = if granted {
                Authorization::Granted
            } else {
                Authorization::Denied
            };
            let event = if granted {
                SUBSCRIPTION_SUCCEEDED
            } else {
                SUBSCRIPTION_ERROR
            };
            (event, matching(&channel.bindings, event))
        };

        let push = PushEvent {
            channel: name.to_owned(),
            event: event.to_owned(),
            data: serde_json::Value::Null,
        };
        for listener in listeners {
            listener(&push);
        }
        true
    }

    // ── Publishing ───────────────────────────────────────────────────

    /// Publish `event` on channel `name`. Returns the number of listeners invoked.
    pub fn emit(&self, name: &str, event: &str, data: serde_json::Value) -> usize {
        let listeners = {
            let state = self.lock();
            match state.channels.get(name) {
                Some(channel) if channel.authorization != Authorization::Denied => {
                    matching(&channel.bindings, event)
                }
                _ => Vec::new(),
            }
        };

        let push = PushEvent {
            channel: name.to_owned(),
            event: event.to_owned(),
            data,
        };
        for listener in &listeners {
            listener(&push);
        }
        listeners.len()
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub fn calls(&self, name: &str) -> ChannelCalls {
        self.lock().calls.get(name).copied().unwrap_or_default()
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.lock().channels.contains_key(name)
    }

    /// Number of listeners currently bound on `name`.
    pub fn bound_listeners(&self, name: &str) -> usize {
        self.lock()
            .channels
            .get(name)
            .map_or(0, |c| c.bindings.len())
    }

    pub fn open_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn state_listener_count(&self) -> usize {
        self.lock().state_listeners.len()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn open(&self, name: &str, private: bool) -> Result<ChannelHandle, Error> {
        if !self.is_available() {
            return Err(Error::TransportUnavailable);
        }

        let handle = ChannelHandle::new(self.next_id(), name);
        let mut state = self.lock();

        let calls = state.calls.entry(name.to_owned()).or_default();
        if private {
            calls.private_creates += 1;
        } else {
            calls.public_creates += 1;
        }

        if private && state.rejected.contains(name) {
            return Err(Error::ChannelRejected {
                channel: name.to_owned(),
                reason: "authorization endpoint returned 403".into(),
            });
        }

        let authorization = if private {
            Authorization::Pending
        } else {
            Authorization::NotRequired
        };
        state.channels.insert(
            name.to_owned(),
            MemoryChannel {
                handle: handle.clone(),
                authorization,
                bindings: Vec::new(),
            },
        );
        Ok(handle)
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl PushTransport for MemoryTransport {
    fn is_available(&self) -> bool {
        self.connection_state().is_connected()
    }

    fn create_private_channel(&self, name: &str) -> Result<ChannelHandle, Error> {
        self.open(name, true)
    }

    fn create_public_channel(&self, name: &str) -> Result<ChannelHandle, Error> {
        self.open(name, false)
    }

    fn bind(&self, handle: &ChannelHandle, event: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId::new(self.next_id());
        let auto = self.auto_authorize.load(Ordering::Relaxed);

        let fire = {
            let mut state = self.lock();
            let denied = state.denied.contains(handle.name());
            let Some(channel) = state.channels.get_mut(handle.name()) else {
                return id;
            };
            if channel.handle != *handle {
                return id;
            }
            channel.bindings.push(Binding {
                id,
                event: event.to_owned(),
                listener: listener.clone(),
            });

            // Auto mode settles the handshake as soon as someone is
            // listening for its outcome.
            let outcome = if denied {
                SUBSCRIPTION_ERROR
            } else {
                SUBSCRIPTION_SUCCEEDED
            };
            if auto && channel.authorization == Authorization::Pending && event == outcome {
                channel.authorization = if denied {
                    Authorization::Denied
                } else {
                    Authorization::Granted
                };
                true
            } else {
                false
            }
        };

        if fire {
            listener(&PushEvent {
                channel: handle.name().to_owned(),
                event: event.to_owned(),
                data: serde_json::Value::Null,
            });
        }
        id
    }

    fn unbind(&self, handle: &ChannelHandle, event: &str, listener: ListenerId) {
        let mut state = self.lock();
        if let Some(channel) = state.channels.get_mut(handle.name()) {
            if channel.handle == *handle {
                channel
                    .bindings
                    .retain(|b| !(b.id == listener && b.event == event));
            }
        }
    }

    fn leave(&self, handle: &ChannelHandle) {
        let mut state = self.lock();
        state
            .calls
            .entry(handle.name().to_owned())
            .or_default()
            .leaves += 1;
        if state
            .channels
            .get(handle.name())
            .is_some_and(|c| c.handle == *handle)
        {
            state.channels.remove(handle.name());
        }
    }

    fn on_connection_state_change(&self, listener: StateListener) -> ListenerId {
        let id = ListenerId::new(self.next_id());
        self.lock().state_listeners.push((id, listener));
        id
    }

    fn off_connection_state_change(&self, listener: ListenerId) {
        self.lock().state_listeners.retain(|(id, _)| *id != listener);
    }
}

fn matching(bindings: &[Binding], event: &str) -> Vec<EventListener> {
    bindings
        .iter()
        .filter(|b| b.event == event)
        .map(|b| b.listener.clone())
        .collect()
}
