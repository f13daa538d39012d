// ── Realtime service ──
//
// The process-wide multiplexer. Owns the transport slot, the subscription
// lifecycle (channel registry, pending queue, global tracking), the
// snapshot registry, and the two timers (resubscribe debounce and pending
// poller). Cheap to clone; all clones share one service.
//
// Connection handling:
//   first `connected`           -> flush the pending queue
//   `connected` after a loss    -> bump the epoch, debounce, rebuild every
//                                  channel, flush, resync snapshots
//   no transport for a while    -> poll the queue, then raise one notice

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use arc_swap::ArcSwapOption;
use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use greenlink_api::{
    ConnectionState, EntityId, ListenerId, PushEvent, PushTransport, ServerTimestamp,
    SnapshotFetcher,
};

use crate::channel::{ChannelControl, ChannelSink, ChannelState, TransportSlot};
use crate::config::RealtimeConfig;
use crate::error::CoreError;
use crate::event::RealtimeEvent;
use crate::notify::{Notifier, ToastSink};
use crate::resubscribe::{ResubscribeManager, ResubscribeReport};
use crate::store::{CachedSnapshot, Observation, SnapshotRegistry};
use crate::subscription::lifecycle::{Link, authorization_toast};
use crate::subscription::{
    EventHandler, FlushReport, OwnerId, SubscribeOptions, SubscribeOutcome, SubscriptionId,
    SubscriptionLifecycle,
};
use crate::timer::{ScheduledTask, TaskSlot};
use crate::topic::Topic;

// ── Requests ─────────────────────────────────────────────────────────

/// A subscription request.
///
/// The handler is optional only so that a request built without one can
/// be reported and ignored instead of panicking in the caller.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub topic: Topic,
    pub owner: OwnerId,
    pub handler: Option<EventHandler>,
    pub options: SubscribeOptions,
}

impl SubscriptionRequest {
    pub fn new(topic: Topic, owner: OwnerId) -> Self {
        Self {
            topic,
            owner,
            handler: None,
            options: SubscribeOptions::default(),
        }
    }

    pub fn handler(mut self, handler: EventHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn options(mut self, options: SubscribeOptions) -> Self {
        self.options = options;
        self
    }
}

// ── Stats ────────────────────────────────────────────────────────────

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RealtimeStats {
    pub connection: Option<ConnectionState>,
    pub epoch: u64,
    pub channels: usize,
    pub active_channels: usize,
    pub authorizing_channels: usize,
    pub dead_channels: usize,
    pub subscriptions: usize,
    pub pending: usize,
    pub owners: usize,
    pub snapshots: usize,
    pub resubscribe_rounds: u64,
    pub delivered: u64,
    pub dropped_stale: u64,
    pub handler_failures: u64,
    pub unavailable_notices: u64,
}

// ── Service ──────────────────────────────────────────────────────────

#[derive(Default)]
struct ConnectionTracking {
    connected_once: bool,
    lost: bool,
    last: Option<ConnectionState>,
}

#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    dropped_stale: AtomicU64,
    handler_failures: AtomicU64,
}

pub(crate) struct RealtimeInner {
    config: RealtimeConfig,
    this: Weak<RealtimeInner>,
    sink: Weak<dyn ChannelSink>,
    transport: TransportSlot,
    state_listener: Mutex<Option<(Arc<dyn PushTransport>, ListenerId)>>,
    connection: Mutex<ConnectionTracking>,
    epoch: AtomicU64,
    lifecycle: SubscriptionLifecycle,
    snapshots: SnapshotRegistry,
    resubscribe: ResubscribeManager,
    poller: TaskSlot,
    notifier: Notifier,
    fetcher: ArcSwapOption<Arc<dyn SnapshotFetcher>>,
    runtime: ArcSwapOption<Handle>,
    fetches: Mutex<JoinSet<()>>,
    fetching: Mutex<HashSet<EntityId>>,
    counters: Counters,
}

/// Handle to the realtime multiplexer.
#[derive(Clone)]
pub struct Realtime {
    inner: Arc<RealtimeInner>,
}

impl Default for Realtime {
    fn default() -> Self {
        Self::new(RealtimeConfig::default())
    }
}

impl std::fmt::Debug for Realtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realtime")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Realtime {
    pub fn new(config: RealtimeConfig) -> Self {
        let inner = Arc::new_cyclic(|this: &Weak<RealtimeInner>| {
            let sink: Weak<dyn ChannelSink> = this.clone();
            RealtimeInner {
                config,
                this: this.clone(),
                sink,
                transport: TransportSlot::new(),
                state_listener: Mutex::new(None),
                connection: Mutex::new(ConnectionTracking::default()),
                epoch: AtomicU64::new(1),
                lifecycle: SubscriptionLifecycle::new(),
                snapshots: SnapshotRegistry::new(),
                resubscribe: ResubscribeManager::new(),
                poller: TaskSlot::new(),
                notifier: Notifier::new(),
                fetcher: ArcSwapOption::empty(),
                runtime: ArcSwapOption::new(Handle::try_current().ok().map(Arc::new)),
                fetches: Mutex::new(JoinSet::new()),
                fetching: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }
        });
        Self { inner }
    }

    /// A service that fetches snapshots for reconciled subscriptions.
    pub fn with_fetcher(config: RealtimeConfig, fetcher: Arc<dyn SnapshotFetcher>) -> Self {
        let service = Self::new(config);
        service.set_fetcher(Some(fetcher));
        service
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Runtime that timers and snapshot fetches are spawned on. Captured
    /// from the constructing thread when it has one; transports calling
    /// back from their own threads still schedule here.
    pub fn bind_runtime(&self, runtime: Handle) {
        self.inner.runtime.store(Some(Arc::new(runtime)));
    }

    pub fn set_fetcher(&self, fetcher: Option<Arc<dyn SnapshotFetcher>>) {
        self.inner.fetcher.store(fetcher.map(Arc::new));
    }

    /// Sink for the process-wide "live updates unavailable" notice.
    pub fn set_toast_sink(&self, sink: Option<Arc<dyn ToastSink>>) {
        self.inner.notifier.set_sink(sink);
    }

    // ── Transport ────────────────────────────────────────────────────

    /// Install (or replace) the push transport and start following its
    /// connection state. If it is already connected, queued subscriptions
    /// are flushed right away.
    pub fn install_transport(&self, transport: Arc<dyn PushTransport>) {
        self.inner.install_transport(transport);
    }

    /// Stop following the transport and forget it. Channels are not left;
    /// call [`reset`](Self::reset) first for that.
    pub fn detach_transport(&self) {
        self.inner.remove_state_listener();
        self.inner.transport.clear();
    }

    pub fn has_transport(&self) -> bool {
        self.inner.transport.get().is_some()
    }

    // ── Subscribing ──────────────────────────────────────────────────

    /// Subscribe to a topic. Never fails: without a transport the request
    /// is queued, and a request without a handler is logged and ignored.
    pub fn subscribe(&self, request: SubscriptionRequest) -> Unsubscribe {
        let Some(handler) = request.handler else {
            let err = CoreError::MissingHandler {
                topic: request.topic.name().to_string(),
            };
            warn!(owner = %request.owner, error = %err, "ignoring subscription request");
            return Unsubscribe::noop(request.owner);
        };
        self.inner
            .subscribe(request.topic, request.owner, handler, request.options)
    }

    /// The command channel topic of `entity`.
    pub fn entity_topic(&self, entity: EntityId) -> Topic {
        Topic::zone_commands(&self.inner.config.zone_topic_prefix, entity)
    }

    /// The global event topic.
    pub fn global_topic(&self) -> Topic {
        Topic::global(&self.inner.config.global_topic, self.inner.config.global_auth)
    }

    pub fn subscribe_to_entity_events(
        &self,
        owner: OwnerId,
        entity: EntityId,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        self.subscribe(
            SubscriptionRequest::new(self.entity_topic(entity), owner)
                .handler(handler)
                .options(options),
        )
    }

    pub fn subscribe_to_global_events(&self, owner: OwnerId, handler: EventHandler) -> Unsubscribe {
        self.subscribe(SubscriptionRequest::new(self.global_topic(), owner).handler(handler))
    }

    /// Release everything `owner` subscribed to, pending or live.
    pub fn teardown_owner(&self, owner: OwnerId) -> usize {
        let transport = self.inner.transport.get();
        self.inner
            .lifecycle
            .teardown_owner(owner, transport.as_deref())
    }

    /// A facade bound to a fresh owner id.
    pub fn scope(&self) -> OwnerScope {
        self.scope_for(OwnerId::new())
    }

    pub fn scope_for(&self, owner: OwnerId) -> OwnerScope {
        OwnerScope {
            service: self.clone(),
            owner,
        }
    }

    pub fn is_live(&self, id: SubscriptionId) -> bool {
        self.inner.lifecycle.is_live(id)
    }

    pub fn is_pending(&self, id: SubscriptionId) -> bool {
        self.inner.lifecycle.is_pending(id)
    }

    pub fn channel_state(&self, topic: &str) -> Option<ChannelState> {
        self.inner
            .lifecycle
            .registry()
            .control(topic)
            .map(|c| c.state())
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.lifecycle.registry().subscriber_count(topic)
    }

    /// Whether the global topic `name` has completed its handshake.
    pub fn is_global_authorized(&self, name: &str) -> bool {
        self.inner.lifecycle.globals().is_authorized(name)
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn get_cached_snapshot(&self, entity: EntityId) -> Option<Arc<CachedSnapshot>> {
        self.inner.snapshots.get(entity)
    }

    /// Install a snapshot obtained elsewhere. Always overwrites.
    pub fn set_snapshot(
        &self,
        entity: EntityId,
        state: Value,
        server_ts: ServerTimestamp,
    ) -> Arc<CachedSnapshot> {
        self.inner.snapshots.set_snapshot(entity, state, server_ts)
    }

    /// Fetch and install the snapshot of `entity`.
    pub async fn refresh_snapshot(&self, entity: EntityId) -> Result<Arc<CachedSnapshot>, CoreError> {
        let fetcher = self
            .inner
            .fetcher
            .load_full()
            .ok_or(CoreError::NoSnapshotSource)?;
        let snapshot = fetcher.fetch_entity_snapshot(entity).await.map_err(|e| {
            CoreError::SnapshotFetchFailed {
                entity,
                reason: e.to_string(),
            }
        })?;
        Ok(self.inner.snapshots.install(entity, snapshot))
    }

    /// Receiver that changes whenever any snapshot is installed or advanced.
    pub fn snapshot_changes(&self) -> watch::Receiver<u64> {
        self.inner.snapshots.subscribe()
    }

    pub fn snapshots(&self) -> &SnapshotRegistry {
        &self.inner.snapshots
    }

    // ── Maintenance ──────────────────────────────────────────────────

    /// Try to materialize queued subscriptions now.
    pub fn flush_pending(&self) -> FlushReport {
        self.inner.flush_pending()
    }

    /// Rebuild stale channels immediately, bypassing the debounce.
    pub fn resubscribe_now(&self) -> ResubscribeReport {
        self.inner.resubscribe.reset();
        self.inner.run_resubscribe()
    }

    pub fn stats(&self) -> RealtimeStats {
        self.inner.stats()
    }

    /// Cancel timers and in-flight fetches, leave every channel and drop
    /// all subscriptions, queued requests and snapshots. The transport
    /// stays installed.
    pub fn reset(&self) {
        self.inner.reset();
    }
}

// ── Service internals ────────────────────────────────────────────────

impl RealtimeInner {
    fn with_link<R>(&self, f: impl FnOnce(&Link<'_>) -> R) -> R {
        let transport = self.transport.get();
        let link = Link {
            transport: transport.as_deref(),
            sink: &self.sink,
            epoch: self.epoch.load(Ordering::SeqCst),
        };
        f(&link)
    }

    /// The bound runtime, else the caller's.
    fn runtime(&self) -> Option<Handle> {
        self.runtime
            .load_full()
            .map(|handle| Handle::clone(&handle))
            .or_else(|| Handle::try_current().ok())
    }

    fn connection(&self) -> MutexGuard<'_, ConnectionTracking> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn install_transport(&self, transport: Arc<dyn PushTransport>) {
        let this = self.this.clone();
        let listener = transport.on_connection_state_change(Arc::new(move |state| {
            if let Some(inner) = this.upgrade() {
                inner.on_state_change(state);
            }
        }));
        let previous = self
            .state_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((transport.clone(), listener));
        if let Some((old, id)) = previous {
            old.off_connection_state_change(id);
        }

        let first = self.transport.install(transport.clone());
        let available = transport.is_available();
        {
            let mut connection = self.connection();
            connection.connected_once = available;
            connection.lost = false;
            connection.last = Some(if available {
                ConnectionState::Connected
            } else {
                ConnectionState::Initialized
            });
        }
        info!(first, available, "push transport installed");

        if !available {
            return;
        }
        self.notifier.transport_recovered();
        if first {
            self.flush_pending();
        } else {
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(epoch, "transport replaced, rebuilding channels");
            self.run_resubscribe();
        }
    }

    fn remove_state_listener(&self) {
        let previous = self
            .state_listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((transport, id)) = previous {
            transport.off_connection_state_change(id);
        }
    }

    fn on_state_change(&self, state: ConnectionState) {
        let reconnect = {
            let mut connection = self.connection();
            connection.last = Some(state);
            if state.is_connected() {
                let reconnect = connection.lost;
                connection.lost = false;
                connection.connected_once = true;
                Some(reconnect)
            } else {
                if connection.connected_once && !connection.lost {
                    connection.lost = true;
                    info!(state = %state, "push transport connection lost");
                }
                None
            }
        };

        match reconnect {
            None => {}
            Some(false) => {
                self.notifier.transport_recovered();
                info!("push transport connected");
                self.flush_pending();
            }
            Some(true) => {
                self.notifier.transport_recovered();
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                info!(epoch, "push transport reconnected, scheduling resubscribe");
                let this = self.this.clone();
                let runtime = self.runtime();
                self.resubscribe.schedule(
                    runtime.as_ref(),
                    self.config.resubscribe_debounce,
                    move || {
                        if let Some(inner) = this.upgrade() {
                            inner.run_resubscribe();
                        }
                    },
                );
            }
        }
    }

    fn run_resubscribe(&self) -> ResubscribeReport {
        let report = self.with_link(|link| self.resubscribe.resubscribe_all(&self.lifecycle, link));
        for name in &report.failed {
            let Some(control) = self.lifecycle.registry().control(name) else {
                continue;
            };
            // Unavailability leaves no failure; the next round retries it.
            match control.failure() {
                Some(reason) => self.toast_subscribers(&control, &reason),
                None => debug!(topic = %name, "resubscribe hit unavailable transport"),
            }
        }
        self.flush_pending();
        if self.config.resync_snapshots_on_reconnect {
            self.resync_snapshots();
        }
        report
    }

    // ── Subscribing ──────────────────────────────────────────────────

    fn subscribe(
        &self,
        topic: Topic,
        owner: OwnerId,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        let entity = topic.entity();
        let reconcile = options.reconcile;
        let outcome = self.with_link(|link| {
            self.lifecycle
                .subscribe(link, topic, owner, handler, options)
        });

        if let SubscribeOutcome::Queued { .. } = outcome {
            self.arm_poller();
        }
        if let Some(entity) = entity.filter(|_| reconcile) {
            if !self.snapshots.contains(entity) {
                self.spawn_snapshot_fetch(entity);
            }
        }

        Unsubscribe {
            inner: self.this.clone(),
            id: Some(outcome.id()),
            owner,
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    fn unsubscribe(&self, id: SubscriptionId, owner: OwnerId) -> bool {
        let transport = self.transport.get();
        self.lifecycle.unsubscribe(id, owner, transport.as_deref())
    }

    fn flush_pending(&self) -> FlushReport {
        self.with_link(|link| self.lifecycle.flush_pending(link))
    }

    // ── Pending poller ───────────────────────────────────────────────

    fn arm_poller(&self) {
        if self.poller.is_armed() {
            return;
        }
        let this = self.this.clone();
        let runtime = self.runtime();
        self.poller.arm(ScheduledTask::every_on(
            runtime.as_ref(),
            self.config.pending_poll_interval,
            move |tick| match this.upgrade() {
                Some(inner) => inner.poll_pending(tick),
                None => ControlFlow::Break(()),
            },
        ));
    }

    fn poll_pending(&self, tick: u32) -> ControlFlow<()> {
        if self.lifecycle.pending().is_empty() {
            return ControlFlow::Break(());
        }
        if self.transport.available().is_some() && self.flush_pending().remaining == 0 {
            return ControlFlow::Break(());
        }
        if self.config.pending_max_polls.is_some_and(|max| tick >= max) {
            warn!(
                polls = tick,
                pending = self.lifecycle.pending().len(),
                "giving up polling for a push transport"
            );
            self.notifier
                .transport_unavailable(&self.config.unavailable_message);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    // ── Snapshots ────────────────────────────────────────────────────

    fn spawn_snapshot_fetch(&self, entity: EntityId) {
        let Some(fetcher) = self.fetcher.load_full() else {
            debug!(zone = %entity, "no snapshot source, zone stays unreconciled");
            return;
        };
        let Some(runtime) = self.runtime() else {
            debug!(zone = %entity, "no runtime, snapshot fetch skipped");
            return;
        };
        if !self
            .fetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity)
        {
            debug!(zone = %entity, "snapshot fetch already in flight");
            return;
        }

        let this = self.this.clone();
        let mut fetches = self.fetches.lock().unwrap_or_else(PoisonError::into_inner);
        while fetches.try_join_next().is_some() {}
        fetches.spawn_on(
            async move {
                let result = fetcher.fetch_entity_snapshot(entity).await;
                let Some(inner) = this.upgrade() else {
                    return;
                };
                inner
                    .fetching
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&entity);
                match result {
                    Ok(snapshot) => {
                        inner.snapshots.install(entity, snapshot);
                    }
                    Err(e) => {
                        let err = CoreError::SnapshotFetchFailed {
                            entity,
                            reason: e.to_string(),
                        };
                        warn!(zone = %entity, error = %err, "zone stays unreconciled");
                    }
                }
            },
            &runtime,
        );
    }

    fn resync_snapshots(&self) {
        let entities = self.lifecycle.registry().reconciled_entities();
        if entities.is_empty() {
            return;
        }
        debug!(zones = entities.len(), "resyncing snapshots");
        for entity in entities {
            self.spawn_snapshot_fetch(entity);
        }
    }

    // ── Notices ──────────────────────────────────────────────────────

    fn toast_subscribers(&self, control: &ChannelControl, reason: &str) {
        let topic = control.topic();
        let toast = authorization_toast(topic, reason);
        for subscription in self.lifecycle.registry().subscribers(topic.name().as_str()) {
            if let Some(sink) = &subscription.options.toast {
                sink.toast(&toast);
            }
        }
    }

    // ── Maintenance ──────────────────────────────────────────────────

    fn stats(&self) -> RealtimeStats {
        let registry = self.lifecycle.registry();
        RealtimeStats {
            connection: self.connection().last,
            epoch: self.epoch.load(Ordering::SeqCst),
            channels: registry.channel_count(),
            active_channels: registry.count_in_state(ChannelState::Active),
            authorizing_channels: registry.count_in_state(ChannelState::Pending),
            dead_channels: registry.count_in_state(ChannelState::Dead),
            subscriptions: registry.subscription_count(),
            pending: self.lifecycle.pending().len(),
            owners: self.lifecycle.owner_count(),
            snapshots: self.snapshots.len(),
            resubscribe_rounds: self.resubscribe.rounds(),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            dropped_stale: self.counters.dropped_stale.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
            unavailable_notices: self.notifier.unavailable_count(),
        }
    }

    fn reset(&self) {
        self.resubscribe.reset();
        self.poller.cancel();
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abort_all();
        self.fetching
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let transport = self.transport.get();
        self.lifecycle.reset(transport.as_deref());
        self.snapshots.clear();
        self.notifier.reset();
        for counter in [
            &self.counters.delivered,
            &self.counters.dropped_stale,
            &self.counters.handler_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        info!("realtime service reset");
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────

impl ChannelSink for RealtimeInner {
    fn on_event(&self, control: &Arc<ChannelControl>, push: &PushEvent) {
        let topic = control.topic();
        let event = RealtimeEvent::from_push(topic, push);

        if let (Some(entity), Some(server_ts)) = (event.entity(), event.server_ts()) {
            if let Observation::Stale { baseline } =
                self.snapshots.observe(entity, server_ts, event.full_state())
            {
                debug!(
                    topic = %topic.name(),
                    zone = %entity,
                    server_ts = %server_ts,
                    baseline = %baseline,
                    event = event.name(),
                    "dropping stale event"
                );
                self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        // Handlers may subscribe or unsubscribe on this topic while we
        // iterate, so dispatch over a copy.
        for subscription in self.lifecycle.registry().subscribers(topic.name().as_str()) {
            if subscription.handler.invoke(&event, &subscription) {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.handler_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn on_authorized(&self, control: &Arc<ChannelControl>) {
        let topic = control.topic();
        info!(topic = %topic.name(), "channel authorized");
        if topic.kind().is_global() {
            self.lifecycle
                .globals()
                .record(topic.name(), ChannelState::Active);
        }
    }

    fn on_authorization_failed(&self, control: &Arc<ChannelControl>, reason: &str) {
        let topic = control.topic();
        warn!(topic = %topic.name(), reason, "channel authorization failed");
        if topic.kind().is_global() {
            self.lifecycle
                .globals()
                .record(topic.name(), ChannelState::Dead);
        }
        self.toast_subscribers(control, reason);
    }
}

// ── Unsubscribe handle ───────────────────────────────────────────────

/// Releases one subscription. Idempotent; clones share the released flag.
#[must_use = "keep the handle to unsubscribe later, or rely on owner teardown"]
#[derive(Clone)]
pub struct Unsubscribe {
    inner: Weak<RealtimeInner>,
    id: Option<SubscriptionId>,
    owner: OwnerId,
    done: Arc<AtomicBool>,
}

impl Unsubscribe {
    /// A handle that does nothing.
    pub fn noop(owner: OwnerId) -> Self {
        Self {
            inner: Weak::new(),
            id: None,
            owner,
            done: Arc::new(AtomicBool::new(true)),
        }
    }

    /// `None` for a no-op handle.
    pub fn id(&self) -> Option<SubscriptionId> {
        self.id
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn is_released(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Release the subscription. Returns `true` only for the call that
    /// actually released it.
    pub fn unsubscribe(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        let (Some(id), Some(inner)) = (self.id, self.inner.upgrade()) else {
            return false;
        };
        inner.unsubscribe(id, self.owner)
    }
}

impl std::fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("released", &self.is_released())
            .finish()
    }
}

// ── Owner scope ──────────────────────────────────────────────────────

/// Per-owner facade. Everything subscribed through it is released when
/// it is torn down or dropped.
pub struct OwnerScope {
    service: Realtime,
    owner: OwnerId,
}

impl OwnerScope {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn subscribe_to_entity_events(
        &self,
        entity: EntityId,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        self.service
            .subscribe_to_entity_events(self.owner, entity, handler, options)
    }

    pub fn subscribe_to_global_events(&self, handler: EventHandler) -> Unsubscribe {
        self.service.subscribe_to_global_events(self.owner, handler)
    }

    pub fn subscribe(
        &self,
        topic: Topic,
        handler: EventHandler,
        options: SubscribeOptions,
    ) -> Unsubscribe {
        self.service.subscribe(
            SubscriptionRequest::new(topic, self.owner)
                .handler(handler)
                .options(options),
        )
    }

    pub fn get_cached_snapshot(&self, entity: EntityId) -> Option<Arc<CachedSnapshot>> {
        self.service.get_cached_snapshot(entity)
    }

    /// Release everything this owner holds. Safe to call repeatedly.
    pub fn teardown(&self) -> usize {
        self.service.teardown_owner(self.owner)
    }
}

impl Drop for OwnerScope {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use greenlink_api::MemoryTransport;
    use serde_json::json;

    use super::*;

    fn service_with(transport: &Arc<MemoryTransport>) -> Realtime {
        let service = Realtime::default();
        service.install_transport(transport.clone());
        service
    }

    #[test]
    fn missing_handler_returns_noop() {
        let service = Realtime::default();
        let unsub = service.subscribe(SubscriptionRequest::new(
            service.entity_topic(EntityId::new(1)),
            OwnerId::new(),
        ));
        assert!(unsub.id().is_none());
        assert!(!unsub.unsubscribe());
        assert_eq!(service.stats().pending, 0);
    }

    #[test]
    fn unsubscribe_is_idempotent_across_clones() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_with(&transport);
        let unsub = service.subscribe_to_entity_events(
            OwnerId::new(),
            EntityId::new(3),
            EventHandler::infallible(|_| {}),
            SubscribeOptions::default(),
        );
        let copy = unsub.clone();
        assert!(unsub.unsubscribe());
        assert!(!copy.unsubscribe());
        assert!(!transport.is_open("commands.3"));
    }

    #[test]
    fn installing_connected_transport_flushes_queue() {
        let service = Realtime::default();
        let unsub = service.subscribe_to_entity_events(
            OwnerId::new(),
            EntityId::new(5),
            EventHandler::infallible(|_| {}),
            SubscribeOptions::default(),
        );
        let id = unsub.id().unwrap();
        assert!(service.is_pending(id));

        let transport = Arc::new(MemoryTransport::new());
        service.install_transport(transport.clone());
        assert!(service.is_live(id));
        assert_eq!(transport.calls("commands.5").private_creates, 1);
    }

    #[test]
    fn owner_scope_drop_releases_subscriptions() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_with(&transport);
        {
            let scope = service.scope();
            let _unsub = scope.subscribe_to_global_events(EventHandler::infallible(|_| {}));
            assert!(transport.is_open("events.global"));
        }
        assert!(!transport.is_open("events.global"));
        assert_eq!(service.stats().owners, 0);
    }

    #[test]
    fn reset_leaves_channels_and_clears_state() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_with(&transport);
        let _unsub = service.subscribe_to_entity_events(
            OwnerId::new(),
            EntityId::new(8),
            EventHandler::infallible(|_| {}),
            SubscribeOptions::default(),
        );
        service.set_snapshot(EntityId::new(8), json!({}), ServerTimestamp::new(1));

        service.reset();
        let stats = service.stats();
        assert_eq!(stats.channels, 0);
        assert_eq!(stats.subscriptions, 0);
        assert_eq!(stats.snapshots, 0);
        assert!(!transport.is_open("commands.8"));
        assert!(service.has_transport());
    }

    #[test]
    fn detach_transport_removes_state_listener() {
        let transport = Arc::new(MemoryTransport::new());
        let service = service_with(&transport);
        assert_eq!(transport.state_listener_count(), 1);
        service.detach_transport();
        assert_eq!(transport.state_listener_count(), 0);
        assert!(!service.has_transport());
    }
}
