// ── Scheduled tasks ──
//
// Every timer the realtime layer runs (resubscribe debounce, pending-queue
// polling) is held in a `TaskSlot` so it can be cancelled on reset and
// replaced when re-armed. Dropping a `ScheduledTask` cancels it.

use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handle to a spawned one-shot or periodic task.
pub struct ScheduledTask {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `f` once after `delay` on the current thread's runtime.
    pub fn after<F>(delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::after_on(None, delay, f)
    }

    /// Run `f` once after `delay` on `runtime`, or on the current thread's
    /// runtime when `None`.
    ///
    /// With no runtime to schedule on at all, `f` runs immediately.
    pub fn after_on<F>(runtime: Option<&Handle>, delay: Duration, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        let Some(runtime) = resolve(runtime) else {
            tracing::debug!("no runtime, running delayed task inline");
            f();
            token.cancel();
            return Self {
                token,
                handle: None,
            };
        };

        let cancel = token.clone();
        let handle = runtime.spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => f(),
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Call `f` every `period` (first call after one period) until it
    /// returns `Break` or the task is cancelled. `f` receives the 1-based
    /// tick number.
    pub fn every<F>(period: Duration, f: F) -> Self
    where
        F: FnMut(u32) -> ControlFlow<()> + Send + 'static,
    {
        Self::every_on(None, period, f)
    }

    /// [`every`](Self::every) on `runtime`, or on the current thread's
    /// runtime when `None`.
    ///
    /// With no runtime at all nothing is spawned and the task is finished.
    pub fn every_on<F>(runtime: Option<&Handle>, period: Duration, mut f: F) -> Self
    where
        F: FnMut(u32) -> ControlFlow<()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let Some(runtime) = resolve(runtime) else {
            tracing::debug!("no runtime, periodic task not started");
            token.cancel();
            return Self {
                token,
                handle: None,
            };
        };

        let cancel = token.clone();
        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // consume the immediate first tick
            let mut tick: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        tick = tick.saturating_add(1);
                        if f(tick).is_break() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// `true` once the task ran to completion or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.token.is_cancelled() || self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

fn resolve(runtime: Option<&Handle>) -> Option<Handle> {
    runtime.cloned().or_else(|| Handle::try_current().ok())
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// A re-armable slot holding at most one scheduled task.
#[derive(Default)]
pub struct TaskSlot {
    task: Mutex<Option<ScheduledTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ScheduledTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `task`, cancelling whatever was armed before.
    pub fn arm(&self, task: ScheduledTask) {
        let previous = self.lock().replace(task);
        drop(previous);
    }

    /// Cancel the armed task, if any. Returns whether one was still running.
    pub fn cancel(&self) -> bool {
        let previous = self.lock().take();
        previous.is_some_and(|task| {
            let running = !task.is_finished();
            task.cancel();
            running
        })
    }

    pub fn is_armed(&self) -> bool {
        self.lock().as_ref().is_some_and(|task| !task.is_finished())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn after_fires_once_after_delay() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let task = ScheduledTask::after(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_slot_cancels_previous_task() {
        let hits = Arc::new(AtomicU32::new(0));
        let slot = TaskSlot::new();
        for _ in 0..3 {
            let h = hits.clone();
            slot.arm(ScheduledTask::after(Duration::from_millis(100), move || {
                h.fetch_add(1, Ordering::SeqCst);
            }));
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_stops_on_break() {
        let ticks = Arc::new(AtomicU32::new(0));
        let t = ticks.clone();
        let task = ScheduledTask::every(Duration::from_secs(1), move |tick| {
            t.store(tick, Ordering::SeqCst);
            if tick == 3 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_slot_never_fires() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let slot = TaskSlot::new();
        slot.arm(ScheduledTask::after(Duration::from_millis(100), move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(slot.is_armed());
        assert!(slot.cancel());
        assert!(!slot.is_armed());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn without_runtime_after_runs_inline() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let task = ScheduledTask::after(Duration::from_secs(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[test]
    fn explicit_runtime_schedules_from_a_plain_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let task = ScheduledTask::after_on(
            Some(runtime.handle()),
            Duration::from_millis(20),
            move || {
                h.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!task.is_finished());

        runtime.block_on(async { tokio::time::sleep(Duration::from_millis(100)).await });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
