// ── Channel control ──
//
// The live binding between one topic and the transport. Holds at most one
// transport handle and exactly the listener bindings made on it: every
// (re)materialization unbinds whatever was bound before. Listeners carry
// the id of the handle they were bound on and ignore deliveries once the
// control has moved to a newer handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use greenlink_api::{
    ChannelHandle, EventListener, ListenerId, PushEvent, PushTransport, SUBSCRIPTION_ERROR,
    SUBSCRIPTION_SUCCEEDED,
};

use super::{ChannelSink, ChannelState};
use crate::error::CoreError;
use crate::topic::{AuthMode, Topic};

#[derive(Debug, Clone, Copy)]
enum Route {
    Event,
    Authorized,
    Failed,
}

struct ControlInner {
    state: ChannelState,
    handle: Option<ChannelHandle>,
    bindings: Vec<(&'static str, ListenerId)>,
    epoch: u64,
    failure: Option<String>,
}

/// One topic's channel on the transport.
pub struct ChannelControl {
    topic: Topic,
    building: AtomicBool,
    inner: Mutex<ControlInner>,
}

impl std::fmt::Debug for ChannelControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("ChannelControl")
            .field("topic", &self.topic.name())
            .field("state", &inner.state)
            .field("handle", &inner.handle)
            .field("epoch", &inner.epoch)
            .finish_non_exhaustive()
    }
}

impl ChannelControl {
    /// A control that has not been materialized yet. It starts `Dead` so the
    /// first `materialize` is what brings it to life.
    pub fn new(topic: Topic) -> Self {
        Self {
            topic,
            building: AtomicBool::new(false),
            inner: Mutex::new(ControlInner {
                state: ChannelState::Dead,
                handle: None,
                bindings: Vec::new(),
                epoch: 0,
                failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    /// Connection epoch this control was last materialized in.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Reason of the last authorization failure, if the control is dead
    /// because of one.
    pub fn failure(&self) -> Option<String> {
        self.lock().failure.clone()
    }

    pub fn handle(&self) -> Option<ChannelHandle> {
        self.lock().handle.clone()
    }

    pub fn binding_count(&self) -> usize {
        self.lock().bindings.len()
    }

    /// Not dead and materialized on the current connection.
    pub fn is_usable(&self, epoch: u64) -> bool {
        let inner = self.lock();
        inner.state != ChannelState::Dead && inner.epoch >= epoch
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Create the channel on `transport` and bind its listeners.
    ///
    /// Any previous handle is unbound and left first. Private channels end
    /// up `Pending` until the transport reports the handshake outcome;
    /// public channels are `Active` at once. A synchronous creation error
    /// leaves the control `Dead`.
    ///
    /// A call that overlaps an in-flight materialization of the same
    /// control returns `Ok` without doing anything.
    pub(crate) fn materialize(
        self: &Arc<Self>,
        transport: &dyn PushTransport,
        sink: &Weak<dyn ChannelSink>,
        epoch: u64,
    ) -> Result<(), CoreError> {
        if self
            .building
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(topic = %self.topic.name(), "joining in-flight materialization");
            return Ok(());
        }
        let result = self.build(transport, sink, epoch);
        self.building.store(false, Ordering::Release);
        result
    }

    fn build(
        self: &Arc<Self>,
        transport: &dyn PushTransport,
        sink: &Weak<dyn ChannelSink>,
        epoch: u64,
    ) -> Result<(), CoreError> {
        self.release(transport);

        let name = self.topic.name().as_str();
        let created = match self.topic.auth() {
            AuthMode::Private => transport.create_private_channel(name),
            AuthMode::Public => transport.create_public_channel(name),
        };

        let handle = match created {
            Ok(handle) => handle,
            Err(e) => {
                let err = CoreError::from(e);
                let mut inner = self.lock();
                inner.state = ChannelState::Dead;
                inner.epoch = epoch;
                inner.failure = (!err.is_unavailable()).then(|| err.to_string());
                return Err(err);
            }
        };

        {
            let mut inner = self.lock();
            inner.state = match self.topic.auth() {
                AuthMode::Private => ChannelState::Pending,
                AuthMode::Public => ChannelState::Active,
            };
            inner.handle = Some(handle.clone());
            inner.epoch = epoch;
            inner.failure = None;
        }

        // Bind outside the lock: the transport may settle the handshake
        // synchronously from inside `bind`.
        let mut bindings = Vec::new();
        for &event in self.topic.kind().event_names() {
            let id = transport.bind(&handle, event, self.listener(&handle, sink, Route::Event));
            bindings.push((event, id));
        }
        if self.topic.auth() == AuthMode::Private {
            let id = transport.bind(
                &handle,
                SUBSCRIPTION_SUCCEEDED,
                self.listener(&handle, sink, Route::Authorized),
            );
            bindings.push((SUBSCRIPTION_SUCCEEDED, id));
            let id = transport.bind(
                &handle,
                SUBSCRIPTION_ERROR,
                self.listener(&handle, sink, Route::Failed),
            );
            bindings.push((SUBSCRIPTION_ERROR, id));
        }

        let orphaned = {
            let mut inner = self.lock();
            if inner.handle.as_ref() == Some(&handle) {
                inner.bindings = bindings;
                None
            } else {
                Some(bindings)
            }
        };
        if let Some(bindings) = orphaned {
            for (event, id) in bindings {
                transport.unbind(&handle, event, id);
            }
        }

        tracing::debug!(
            topic = %self.topic.name(),
            handle = %handle,
            epoch,
            state = %self.state(),
            "channel materialized"
        );
        Ok(())
    }

    /// Unbind every listener, leave the channel and mark the control dead.
    /// Returns `false` if there was nothing to release.
    pub(crate) fn teardown(&self, transport: Option<&dyn PushTransport>) -> bool {
        let released = match transport {
            Some(transport) => self.release(transport),
            None => {
                let mut inner = self.lock();
                inner.bindings.clear();
                inner.handle.take().is_some()
            }
        };
        let mut inner = self.lock();
        inner.state = ChannelState::Dead;
        released
    }

    fn release(&self, transport: &dyn PushTransport) -> bool {
        let (handle, bindings) = {
            let mut inner = self.lock();
            (inner.handle.take(), std::mem::take(&mut inner.bindings))
        };
        let Some(handle) = handle else {
            return false;
        };
        for (event, id) in bindings {
            transport.unbind(&handle, event, id);
        }
        transport.leave(&handle);
        tracing::debug!(topic = %self.topic.name(), handle = %handle, "channel released");
        true
    }

    // ── Transport callbacks ──────────────────────────────────────────

    fn is_current(&self, handle_id: u64) -> bool {
        self.lock()
            .handle
            .as_ref()
            .is_some_and(|h| h.id() == handle_id)
    }

    fn mark_authorized(&self, handle_id: u64) -> bool {
        let mut inner = self.lock();
        if inner.handle.as_ref().is_none_or(|h| h.id() != handle_id)
            || inner.state != ChannelState::Pending
        {
            return false;
        }
        inner.state = ChannelState::Active;
        true
    }

    fn mark_failed(&self, handle_id: u64, reason: &str) -> bool {
        let mut inner = self.lock();
        if inner.handle.as_ref().is_none_or(|h| h.id() != handle_id)
            || inner.state == ChannelState::Dead
        {
            return false;
        }
        inner.state = ChannelState::Dead;
        inner.failure = Some(reason.to_owned());
        true
    }

    fn listener(
        self: &Arc<Self>,
        handle: &ChannelHandle,
        sink: &Weak<dyn ChannelSink>,
        route: Route,
    ) -> EventListener {
        let control = Arc::downgrade(self);
        let sink = sink.clone();
        let handle_id = handle.id();

        Arc::new(move |push: &PushEvent| {
            let (Some(control), Some(sink)) = (control.upgrade(), sink.upgrade()) else {
                return;
            };
            match route {
                Route::Event => {
                    if control.is_current(handle_id) && control.state() != ChannelState::Dead {
                        sink.on_event(&control, push);
                    }
                }
                Route::Authorized => {
                    if control.mark_authorized(handle_id) {
                        sink.on_authorized(&control);
                    }
                }
                Route::Failed => {
                    let reason = failure_reason(&push.data);
                    if control.mark_failed(handle_id, &reason) {
                        sink.on_authorization_failed(&control, &reason);
                    }
                }
            }
        })
    }
}

fn failure_reason(data: &serde_json::Value) -> String {
    let text = ["error", "message"]
        .iter()
        .find_map(|k| data.get(*k)?.as_str())
        .filter(|s| !s.is_empty());
    if let Some(text) = text {
        return text.to_owned();
    }
    match data.get("status").and_then(serde_json::Value::as_u64) {
        Some(status) => format!("authorization endpoint returned {status}"),
        None => "authorization rejected".to_owned(),
    }
}
