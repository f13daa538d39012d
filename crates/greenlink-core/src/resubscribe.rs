// ── Resubscribe manager ──
//
// After a reconnect every channel control has to be rebuilt against the
// new connection. Reconnect notifications arriving close together are
// coalesced by a debounce slot; when it fires each control that is not
// already live on the current connection is re-materialized once, with
// its subscriber set untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;

use crate::subscription::SubscriptionLifecycle;
use crate::subscription::lifecycle::Link;
use crate::timer::{ScheduledTask, TaskSlot};

/// Outcome of one resubscribe round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResubscribeReport {
    pub epoch: u64,
    /// Controls re-materialized in this round.
    pub rebuilt: Vec<String>,
    /// Controls whose re-materialization failed. They are dead now.
    pub failed: Vec<String>,
    /// Controls already live on the current connection.
    pub skipped: usize,
}

/// Debounced, cancellable channel rebuilds.
#[derive(Default)]
pub struct ResubscribeManager {
    debounce: TaskSlot,
    requests: AtomicU64,
    rounds: AtomicU64,
}

impl ResubscribeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` on `runtime` once `delay` has passed without another
    /// call. Each call replaces the job armed by the previous one. `None`
    /// uses the caller's runtime.
    pub fn schedule<F>(&self, runtime: Option<&Handle>, delay: Duration, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let n = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(request = n, delay_ms = delay.as_millis(), "resubscribe scheduled");
        self.debounce.arm(ScheduledTask::after_on(runtime, delay, job));
    }

    pub fn is_scheduled(&self) -> bool {
        self.debounce.is_armed()
    }

    /// Cancel a pending rebuild.
    pub fn reset(&self) {
        if self.debounce.cancel() {
            tracing::debug!("pending resubscribe cancelled");
        }
    }

    /// Completed rebuild rounds.
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Rebuild every control that is not live on `link.epoch`. One
    /// failure does not stop the others.
    pub(crate) fn resubscribe_all(
        &self,
        lifecycle: &SubscriptionLifecycle,
        link: &Link<'_>,
    ) -> ResubscribeReport {
        let mut report = ResubscribeReport {
            epoch: link.epoch,
            ..ResubscribeReport::default()
        };
        let Some(transport) = link.transport.filter(|t| t.is_available()) else {
            tracing::debug!("transport gone again, resubscribe deferred");
            return report;
        };

        for control in lifecycle.registry().controls() {
            if control.is_usable(link.epoch) {
                report.skipped += 1;
                continue;
            }
            let name = control.topic().name().to_string();
            match control.materialize(transport, link.sink, link.epoch) {
                Ok(()) => report.rebuilt.push(name),
                Err(e) => {
                    tracing::warn!(topic = %name, error = %e, "resubscribe failed, channel marked dead");
                    report.failed.push(name);
                }
            }
            if control.topic().kind().is_global() {
                lifecycle
                    .globals()
                    .record(control.topic().name(), control.state());
            }
        }

        self.rounds.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            epoch = link.epoch,
            rebuilt = report.rebuilt.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "resubscribed channels"
        );
        report
    }
}
