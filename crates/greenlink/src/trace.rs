// ── Push trace format ──
//
// A trace is a JSONL file: one operation per line, tagged by "op". Blank
// lines and lines starting with '#' are skipped. Omitting "zone" targets
// the global topic.

use serde::Deserialize;
use serde_json::Value;

use crate::error::CliError;

/// One recorded operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    /// Bring the transport up (installing it on first use).
    Connect,
    Disconnect,
    Subscribe {
        owner: String,
        #[serde(default)]
        zone: Option<u64>,
    },
    /// Release the owner's most recent subscription to the topic.
    Unsubscribe {
        owner: String,
        #[serde(default)]
        zone: Option<u64>,
    },
    /// Release everything the owner holds.
    Teardown { owner: String },
    /// Install an authoritative snapshot.
    Snapshot {
        zone: u64,
        server_ts: i64,
        #[serde(default)]
        state: Value,
    },
    /// Publish an event on the topic's channel.
    Emit {
        #[serde(default)]
        zone: Option<u64>,
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Fail future authorization handshakes for the topic.
    Deny {
        #[serde(default)]
        zone: Option<u64>,
    },
    Allow {
        #[serde(default)]
        zone: Option<u64>,
    },
    /// Let timers run (debounced resubscribe, pending poller).
    Wait { ms: u64 },
}

/// An operation with its 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceStep {
    pub line: usize,
    pub op: TraceOp,
}

pub fn parse_trace(text: &str) -> Result<Vec<TraceStep>, CliError> {
    text.lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw.trim()))
        .filter(|(_, raw)| !raw.is_empty() && !raw.starts_with('#'))
        .map(|(line, raw)| {
            serde_json::from_str(raw)
                .map(|op| TraceStep { line, op })
                .map_err(|e| CliError::TraceInvalid {
                    line,
                    reason: e.to_string(),
                })
        })
        .collect()
}
