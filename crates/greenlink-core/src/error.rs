// ── Core error types ──
//
// Errors from greenlink-core. None of these ever cross the subscribe /
// unsubscribe surface: that surface logs and degrades instead. They are
// returned from snapshot refreshes and used internally to classify
// channel materialization failures.

use thiserror::Error;

use greenlink_api::EntityId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport ────────────────────────────────────────────────────
    /// No transport connection yet. Not a failure: callers queue.
    #[error("Push transport unavailable")]
    TransportUnavailable,

    /// The channel handshake was rejected. The channel is dead until retried.
    #[error("Authorization failed for '{topic}': {reason}")]
    AuthorizationFailed { topic: String, reason: String },

    // ── Snapshots ────────────────────────────────────────────────────
    /// Snapshot fetch failed; reconciliation stays off for the entity.
    #[error("Snapshot fetch failed for zone {entity}: {reason}")]
    SnapshotFetchFailed { entity: EntityId, reason: String },

    #[error("No snapshot source configured")]
    NoSnapshotSource,

    // ── Misuse ───────────────────────────────────────────────────────
    #[error("Subscription request for '{topic}' has no handler")]
    MissingHandler { topic: String },

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the failure means "try again once the transport is back".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::TransportUnavailable)
    }
}

// ── Conversion from collaborator errors ──────────────────────────────

impl From<greenlink_api::Error> for CoreError {
    fn from(err: greenlink_api::Error) -> Self {
        match err {
            greenlink_api::Error::TransportUnavailable => CoreError::TransportUnavailable,
            greenlink_api::Error::ChannelRejected { channel, reason } => {
                CoreError::AuthorizationFailed {
                    topic: channel,
                    reason,
                }
            }
            greenlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            greenlink_api::Error::InvalidHeader(e) => CoreError::Config {
                message: format!("Invalid header: {e}"),
            },
            greenlink_api::Error::Tls(msg) => CoreError::Config {
                message: format!("TLS error: {msg}"),
            },
            other => CoreError::Internal(other.to_string()),
        }
    }
}
