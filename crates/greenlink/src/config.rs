//! CLI-side config resolution: `--config` / `GREENLINK_CONFIG` override the
//! platform path, and the realtime settings are built from the result.

use std::path::PathBuf;

use greenlink_core::RealtimeConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub fn resolve_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(greenlink_config::config_path)
}

/// Load the config file (defaults when absent) and build the realtime settings.
pub fn realtime_config(global: &GlobalOpts) -> Result<RealtimeConfig, CliError> {
    let cfg = greenlink_config::load_config_from(&resolve_path(global))?;
    Ok(cfg.realtime_config()?)
}
