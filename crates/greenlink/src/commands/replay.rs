//! Replay handler: drives a `MemoryTransport` and a `Realtime` service from a
//! recorded trace and reports what each emitted event turned into.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tabled::Tabled;

use greenlink_core::{
    EntityId, EventHandler, MemoryTransport, OwnerId, PushEvent, Realtime, RealtimeConfig,
    RealtimeEvent, RealtimeStats, ServerTimestamp, SubscribeOptions, SubscriptionRequest, Toast,
    ToastSink, Topic, Unsubscribe,
};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::error::CliError;
use crate::output;
use crate::trace::{TraceOp, TraceStep, parse_trace};

// ── Report types ─────────────────────────────────────────────────────

/// What became of one emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reached at least one handler.
    Delivered,
    /// Dropped: at or below the zone's snapshot timestamp.
    Stale,
    /// The channel is open but nobody is subscribed.
    NoSubscribers,
    /// No open channel for the topic.
    NoChannel,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delivered => "delivered",
            Self::Stale => "stale",
            Self::NoSubscribers => "no_subscribers",
            Self::NoChannel => "no_channel",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub line: usize,
    pub channel: String,
    pub event: String,
    pub server_ts: Option<ServerTimestamp>,
    pub outcome: Outcome,
    /// Handlers that received the event.
    pub handlers: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OwnerRecord {
    pub owner: String,
    pub live_handles: usize,
    pub delivered: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub operations: usize,
    pub events: Vec<EventRecord>,
    pub owners: Vec<OwnerRecord>,
    pub toasts: Vec<Toast>,
    pub stats: RealtimeStats,
}

impl ReplayReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.events.iter().filter(|e| e.outcome == outcome).count()
    }
}

// ── Table rows ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Line")]
    line: usize,
    #[tabled(rename = "Channel")]
    channel: String,
    #[tabled(rename = "Event")]
    event: String,
    #[tabled(rename = "Server TS")]
    server_ts: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Handlers")]
    handlers: u64,
}

#[derive(Tabled)]
struct OwnerRow {
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Live Handles")]
    live_handles: usize,
    #[tabled(rename = "Delivered")]
    delivered: u64,
}

// ── Toast capture ────────────────────────────────────────────────────

#[derive(Default)]
struct ToastLog(Mutex<Vec<Toast>>);

impl ToastLog {
    fn take(&self) -> Vec<Toast> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ToastSink for ToastLog {
    fn toast(&self, toast: &Toast) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(toast.clone());
    }
}

// ── Replayer ─────────────────────────────────────────────────────────

/// Per-owner delivery counters shared with the handlers.
type Deliveries = Arc<Mutex<HashMap<String, u64>>>;

pub struct Replayer {
    service: Realtime,
    transport: Arc<MemoryTransport>,
    installed: bool,
    owners: HashMap<String, OwnerId>,
    handles: HashMap<(String, String), Vec<Unsubscribe>>,
    deliveries: Deliveries,
    toasts: Arc<ToastLog>,
    events: Vec<EventRecord>,
    operations: usize,
}

impl Replayer {
    pub fn new(config: RealtimeConfig) -> Self {
        let toasts = Arc::new(ToastLog::default());
        let service = Realtime::new(config);
        service.set_toast_sink(Some(toasts.clone()));
        Self {
            service,
            transport: Arc::new(MemoryTransport::offline()),
            installed: false,
            owners: HashMap::new(),
            handles: HashMap::new(),
            deliveries: Arc::default(),
            toasts,
            events: Vec::new(),
            operations: 0,
        }
    }

    fn topic(&self, zone: Option<u64>) -> Topic {
        zone.map_or_else(
            || self.service.global_topic(),
            |z| self.service.entity_topic(EntityId::new(z)),
        )
    }

    fn owner(&mut self, name: &str) -> OwnerId {
        *self.owners.entry(name.to_owned()).or_default()
    }

    pub async fn apply(&mut self, step: TraceStep) {
        self.operations += 1;
        tracing::debug!(line = step.line, op = ?step.op, "replaying");
        match step.op {
            TraceOp::Connect => {
                if !self.installed {
                    self.service.install_transport(self.transport.clone());
                    self.installed = true;
                }
                self.transport.connect();
            }
            TraceOp::Disconnect => self.transport.disconnect(),
            TraceOp::Subscribe { owner, zone } => self.subscribe(owner, zone),
            TraceOp::Unsubscribe { owner, zone } => {
                let topic = self.topic(zone).name().to_string();
                let released = self
                    .handles
                    .get_mut(&(owner.clone(), topic.clone()))
                    .and_then(Vec::pop)
                    .is_some_and(|handle| handle.unsubscribe());
                if !released {
                    tracing::warn!(
                        line = step.line,
                        owner = %owner,
                        topic = %topic,
                        "nothing to unsubscribe"
                    );
                }
            }
            TraceOp::Teardown { owner } => {
                let id = self.owner(&owner);
                let released = self.service.teardown_owner(id);
                self.handles.retain(|(o, _), _| *o != owner);
                tracing::info!(owner = %owner, released, "owner torn down");
            }
            TraceOp::Snapshot {
                zone,
                server_ts,
                state,
            } => {
                self.service.set_snapshot(
                    EntityId::new(zone),
                    state,
                    ServerTimestamp::new(server_ts),
                );
            }
            TraceOp::Emit { zone, event, data } => self.emit(step.line, zone, event, data),
            TraceOp::Deny { zone } => self.transport.deny(self.topic(zone).name().as_str()),
            TraceOp::Allow { zone } => self.transport.allow(self.topic(zone).name().as_str()),
            TraceOp::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
    }

    fn subscribe(&mut self, owner: String, zone: Option<u64>) {
        let id = self.owner(&owner);
        let deliveries = self.deliveries.clone();
        let counted = owner.clone();
        let handler = EventHandler::infallible(move |_: &RealtimeEvent| {
            *deliveries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(counted.clone())
                .or_default() += 1;
        });
        let options = SubscribeOptions::default().with_toast(self.toasts.clone());
        let handle = match zone {
            Some(z) => {
                self.service
                    .subscribe_to_entity_events(id, EntityId::new(z), handler, options)
            }
            None => self.service.subscribe(
                SubscriptionRequest::new(self.service.global_topic(), id)
                    .handler(handler)
                    .options(options),
            ),
        };
        let topic = self.topic(zone).name().to_string();
        self.handles.entry((owner, topic)).or_default().push(handle);
    }

    fn emit(&mut self, line: usize, zone: Option<u64>, event: String, data: Value) {
        let topic = self.topic(zone);
        let channel = topic.name().to_string();
        let push = PushEvent {
            channel: channel.clone(),
            event,
            data,
        };
        let server_ts = RealtimeEvent::from_push(&topic, &push).server_ts();

        let before = self.service.stats();
        let listeners = self.transport.emit(&channel, &push.event, push.data.clone());
        let after = self.service.stats();

        let handlers = after.delivered.saturating_sub(before.delivered);
        let outcome = if listeners == 0 {
            Outcome::NoChannel
        } else if after.dropped_stale > before.dropped_stale {
            Outcome::Stale
        } else if handlers > 0 || after.handler_failures > before.handler_failures {
            Outcome::Delivered
        } else {
            Outcome::NoSubscribers
        };
        self.events.push(EventRecord {
            line,
            channel,
            event: push.event,
            server_ts,
            outcome,
            handlers,
        });
    }

    pub fn finish(self) -> ReplayReport {
        let deliveries = self
            .deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut owners: Vec<OwnerRecord> = self
            .owners
            .keys()
            .map(|name| OwnerRecord {
                owner: name.clone(),
                live_handles: self
                    .handles
                    .iter()
                    .filter(|((o, _), _)| o == name)
                    .flat_map(|(_, hs)| hs)
                    .filter(|h| !h.is_released())
                    .count(),
                delivered: deliveries.get(name).copied().unwrap_or(0),
            })
            .collect();
        owners.sort_by(|a, b| a.owner.cmp(&b.owner));

        let report = ReplayReport {
            operations: self.operations,
            events: self.events,
            owners,
            toasts: self.toasts.take(),
            stats: self.service.stats(),
        };
        self.service.reset();
        report
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn replay_file(path: &Path, config: RealtimeConfig) -> Result<ReplayReport, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::TraceUnreadable {
        path: path.display().to_string(),
        source,
    })?;
    let steps = parse_trace(&text)?;

    let mut replayer = Replayer::new(config);
    for step in steps {
        replayer.apply(step).await;
    }
    Ok(replayer.finish())
}

pub async fn handle(
    args: ReplayArgs,
    config: RealtimeConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let report = replay_file(&args.trace, config).await?;

    if let Some(rendered) = output::render_structured(global.output, &report)? {
        output::print_output(&rendered, global.quiet);
        return Ok(());
    }

    let color = output::should_color(global.color);
    let mut sections = Vec::new();
    if !args.summary && !report.events.is_empty() {
        let rows: Vec<EventRow> = report
            .events
            .iter()
            .map(|e| EventRow {
                line: e.line,
                channel: e.channel.clone(),
                event: e.event.clone(),
                server_ts: e.server_ts.map_or_else(|| "-".into(), |ts| ts.to_string()),
                outcome: output::paint(&e.outcome.to_string(), color),
                handlers: e.handlers,
            })
            .collect();
        sections.push(output::render_table(&rows));
    }
    if !report.owners.is_empty() {
        let rows: Vec<OwnerRow> = report
            .owners
            .iter()
            .map(|o| OwnerRow {
                owner: o.owner.clone(),
                live_handles: o.live_handles,
                delivered: o.delivered,
            })
            .collect();
        sections.push(output::render_table(&rows));
    }
    for toast in &report.toasts {
        sections.push(format!(
            "{} {}: {}",
            output::paint("failed", color),
            toast.title,
            toast.message
        ));
    }
    sections.push(format!(
        "{} operations, {} events: {} delivered, {} stale, {} without subscribers, {} without channel",
        report.operations,
        report.events.len(),
        report.count(Outcome::Delivered),
        report.count(Outcome::Stale),
        report.count(Outcome::NoSubscribers),
        report.count(Outcome::NoChannel),
    ));

    output::print_output(&sections.join("\n\n"), global.quiet);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::trace::parse_trace;

    async fn run(text: &str) -> ReplayReport {
        let mut replayer = Replayer::new(RealtimeConfig::default());
        for step in parse_trace(text).unwrap() {
            replayer.apply(step).await;
        }
        replayer.finish()
    }

    fn outcomes(report: &ReplayReport) -> Vec<Outcome> {
        report.events.iter().map(|e| e.outcome).collect()
    }

    #[tokio::test]
    async fn stale_events_are_reported_as_dropped() {
        let report = run(r#"
{"op":"subscribe","owner":"dashboard","zone":7}
{"op":"connect"}
{"op":"snapshot","zone":7,"server_ts":100,"state":{"ph":6.0}}
{"op":"emit","zone":7,"event":"CommandStatusUpdated","data":{"server_ts":90}}
{"op":"emit","zone":7,"event":"CommandStatusUpdated","data":{"server_ts":110}}
{"op":"emit","zone":7,"event":"CommandStatusUpdated","data":{"server_ts":105}}
"#)
        .await;

        assert_eq!(
            outcomes(&report),
            vec![Outcome::Stale, Outcome::Delivered, Outcome::Stale]
        );
        assert_eq!(report.events[1].server_ts, Some(ServerTimestamp::new(110)));
        assert_eq!(report.owners[0].delivered, 1);
        assert_eq!(report.stats.dropped_stale, 2);
    }

    #[tokio::test]
    async fn unsubscribed_channel_stops_routing() {
        let report = run(r#"
{"op":"connect"}
{"op":"subscribe","owner":"a","zone":1}
{"op":"subscribe","owner":"b","zone":1}
{"op":"unsubscribe","owner":"a","zone":1}
{"op":"emit","zone":1,"event":"CommandStatusUpdated","data":{}}
{"op":"teardown","owner":"b"}
{"op":"emit","zone":1,"event":"CommandStatusUpdated","data":{}}
"#)
        .await;

        assert_eq!(outcomes(&report), vec![Outcome::Delivered, Outcome::NoChannel]);
        assert_eq!(report.events[0].handlers, 1);
        assert!(report.owners.iter().all(|o| o.live_handles == 0));
        assert_eq!(report.stats.channels, 0);
    }

    #[tokio::test]
    async fn denied_global_channel_raises_a_toast() {
        let report = run(r#"
{"op":"deny"}
{"op":"connect"}
{"op":"subscribe","owner":"feed"}
{"op":"emit","event":"AlertRaised","data":{"zone_id":3}}
"#)
        .await;

        assert_eq!(report.toasts.len(), 1);
        assert_eq!(report.stats.dead_channels, 1);
        assert_eq!(outcomes(&report), vec![Outcome::NoChannel]);
    }
}
