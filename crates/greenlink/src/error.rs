//! CLI error types with miette diagnostics.
//!
//! Maps config and trace failures into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use greenlink_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const TRACE: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Trace ────────────────────────────────────────────────────────
    #[error("Could not read trace file {path}")]
    #[diagnostic(
        code(greenlink::trace_unreadable),
        help("Check that the file exists and is readable.")
    )]
    TraceUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid trace operation on line {line}: {reason}")]
    #[diagnostic(
        code(greenlink::trace_invalid),
        help(
            "Each line must be one JSON object with an \"op\" field, e.g.\n\
             {{\"op\":\"subscribe\",\"owner\":\"dashboard\",\"zone\":7}}"
        )
    )]
    TraceInvalid { line: usize, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file already exists at {path}")]
    #[diagnostic(
        code(greenlink::config_exists),
        help("Pass --force to overwrite it.")
    )]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(greenlink::config),
        help("Run: greenlink config show to inspect the effective configuration")
    )]
    Config(#[from] ConfigError),

    #[error("Failed to render configuration: {0}")]
    #[diagnostic(code(greenlink::config_render))]
    ConfigRender(#[from] toml::ser::Error),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(greenlink::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TraceUnreadable { .. } | Self::TraceInvalid { .. } => exit_code::TRACE,
            Self::ConfigExists { .. } => exit_code::USAGE,
            Self::Config(_) | Self::ConfigRender(_) => exit_code::CONFIG,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}
