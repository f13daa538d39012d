//! Config subcommand handlers.

use greenlink_config::{self as config, Config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Rendered form of the effective config with the token masked.
fn redacted(cfg: &Config) -> Config {
    let mut shown = cfg.clone();
    if shown.api.token.is_some() {
        shown.api.token = Some("********".into());
    }
    shown
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = crate::config::resolve_path(global);
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
        }

        ConfigCommand::Show => {
            let cfg = redacted(&config::load_config_from(&path)?);
            let rendered = match output::render_structured(global.output, &cfg)? {
                Some(json) => json,
                None => toml::to_string_pretty(&cfg)?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config_to(&Config::default(), &path)?;
            tracing::info!(path = %path.display(), "config written");
            output::print_output(
                &format!("Wrote default configuration to {}", path.display()),
                global.quiet,
            );
        }
    }
    Ok(())
}
