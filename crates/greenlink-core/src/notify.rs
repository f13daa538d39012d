// ── User-facing notices ──
//
// The realtime layer surfaces two kinds of notices: a per-subscription
// toast when that subscription's channel fails authorization, and one
// process-wide notice when the transport stays unavailable. The latter is
// latched so reconnect loops cannot produce a notification storm.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use serde::Serialize;

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ToastLevel {
    Info,
    Warning,
    Error,
}

/// A short user-facing notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub level: ToastLevel,
    pub title: String,
    pub message: String,
}

impl Toast {
    pub fn new(level: ToastLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

/// Receives toasts. Implemented by the UI layer.
pub trait ToastSink: Send + Sync {
    fn toast(&self, toast: &Toast);
}

/// Process-wide notifier with a latched "transport unavailable" notice.
#[derive(Default)]
pub struct Notifier {
    sink: ArcSwapOption<Arc<dyn ToastSink>>,
    unavailable_latched: AtomicBool,
    unavailable_raised: AtomicU64,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&self, sink: Option<Arc<dyn ToastSink>>) {
        self.sink.store(sink.map(Arc::new));
    }

    /// Raise the unavailability notice unless it is already showing.
    /// Returns `true` if the notice was emitted.
    pub fn transport_unavailable(&self, message: &str) -> bool {
        if self.unavailable_latched.swap(true, Ordering::SeqCst) {
            tracing::debug!("unavailability notice already raised");
            return false;
        }
        self.unavailable_raised.fetch_add(1, Ordering::Relaxed);
        tracing::warn!("push transport still unavailable, live updates paused");
        if let Some(sink) = self.sink.load_full() {
            sink.toast(&Toast::new(ToastLevel::Warning, "Live updates", message));
        }
        true
    }

    /// Clear the latch once the transport is connected again.
    pub fn transport_recovered(&self) {
        self.unavailable_latched.store(false, Ordering::SeqCst);
    }

    pub fn is_unavailable_raised(&self) -> bool {
        self.unavailable_latched.load(Ordering::SeqCst)
    }

    /// How many times the notice has been emitted over the service lifetime.
    pub fn unavailable_count(&self) -> u64 {
        self.unavailable_raised.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.unavailable_latched.store(false, Ordering::SeqCst);
        self.unavailable_raised.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Toast>>);

    impl ToastSink for Collect {
        fn toast(&self, toast: &Toast) {
            self.0.lock().unwrap().push(toast.clone());
        }
    }

    #[test]
    fn unavailable_notice_is_latched_until_recovery() {
        let sink = Arc::new(Collect::default());
        let notifier = Notifier::new();
        notifier.set_sink(Some(sink.clone()));

        assert!(notifier.transport_unavailable("down"));
        assert!(!notifier.transport_unavailable("down"));
        assert_eq!(sink.0.lock().unwrap().len(), 1);

        notifier.transport_recovered();
        assert!(notifier.transport_unavailable("down again"));
        assert_eq!(notifier.unavailable_count(), 2);
        assert_eq!(sink.0.lock().unwrap()[1].message, "down again");
    }

    #[test]
    fn works_without_sink() {
        let notifier = Notifier::new();
        assert!(notifier.transport_unavailable("down"));
        assert!(notifier.is_unavailable_raised());
    }
}
