use thiserror::Error;

/// Top-level error type for the `greenlink-api` crate.
///
/// Covers every failure mode of the collaborators the multiplexer talks to:
/// the push transport, the snapshot REST endpoint, and HTTP client setup.
/// `greenlink-core` maps these into its own taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Push transport ──────────────────────────────────────────────
    /// No transport connection exists yet (or it is down).
    #[error("Push transport unavailable")]
    TransportUnavailable,

    /// The transport refused to open a channel (authorization handshake rejected).
    #[error("Channel '{channel}' rejected: {reason}")]
    ChannelRejected { channel: String, reason: String },

    // ── HTTP ────────────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A configured header value (e.g. the bearer token) is not valid HTTP.
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),

    // ── Snapshot API ────────────────────────────────────────────────
    /// Non-success response from the snapshot endpoint.
    #[error("Snapshot API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::TransportUnavailable => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Http(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the transport rejected a channel handshake.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::ChannelRejected { .. })
    }
}
