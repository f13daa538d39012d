//! Shared configuration for greenlink tools.
//!
//! One TOML file plus `GREENLINK_`-prefixed environment variables, resolved
//! into the runtime settings of the realtime layer ([`RealtimeConfig`]) and
//! of the snapshot backend ([`HttpConfig`], [`SnapshotClient`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use greenlink_api::{HttpConfig, SnapshotClient, TlsMode};
use greenlink_core::{AuthMode, RealtimeConfig};

/// Environment variable prefix. Nested keys are separated by `__`,
/// e.g. `GREENLINK_REALTIME__RESUBSCRIBE_DEBOUNCE=500ms`.
pub const ENV_PREFIX: &str = "GREENLINK_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("snapshot client setup failed: {0}")]
    Api(#[from] greenlink_api::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub realtime: RealtimeSection,

    #[serde(default)]
    pub api: ApiSection,
}

/// `[realtime]`: tuning of the subscription multiplexer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RealtimeSection {
    #[serde(with = "humantime_duration")]
    pub resubscribe_debounce: Duration,

    #[serde(with = "humantime_duration")]
    pub pending_poll_interval: Duration,

    /// Polls before the unavailability notice. `0` polls forever.
    pub pending_max_polls: u32,

    pub resync_snapshots_on_reconnect: bool,

    pub global_topic: String,

    pub global_auth: AuthMode,

    pub zone_topic_prefix: String,

    pub unavailable_message: String,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        let rt = RealtimeConfig::default();
        Self {
            resubscribe_debounce: rt.resubscribe_debounce,
            pending_poll_interval: rt.pending_poll_interval,
            pending_max_polls: rt.pending_max_polls.unwrap_or(0),
            resync_snapshots_on_reconnect: rt.resync_snapshots_on_reconnect,
            global_topic: rt.global_topic,
            global_auth: rt.global_auth,
            zone_topic_prefix: rt.zone_topic_prefix,
            unavailable_message: rt.unavailable_message,
        }
    }
}

/// `[api]`: the snapshot backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiSection {
    /// Backend base URL (e.g. "https://greenhouse.local"). Without it no
    /// snapshots are fetched.
    pub base_url: Option<String>,

    /// Bearer token (plaintext; prefer `token_env` or `GREENLINK_API__TOKEN`).
    pub token: Option<String>,

    /// Environment variable name containing the bearer token.
    pub token_env: Option<String>,

    #[serde(with = "humantime_duration")]
    pub timeout: Duration,

    /// Accept any certificate.
    pub insecure: bool,

    /// Path to a custom CA certificate (PEM).
    pub ca_cert: Option<PathBuf>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            token_env: None,
            timeout: HttpConfig::default().timeout,
            insecure: false,
            ca_cert: None,
        }
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

// ── Resolution ──────────────────────────────────────────────────────

impl Config {
    /// Check every field that has constraints beyond its type.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rt = &self.realtime;
        if rt.pending_poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "realtime.pending_poll_interval",
                "must be greater than zero",
            ));
        }
        if rt.global_topic.trim().is_empty() {
            return Err(ConfigError::invalid("realtime.global_topic", "must not be empty"));
        }
        if rt.zone_topic_prefix.is_empty() || rt.zone_topic_prefix.contains(char::is_whitespace)
        {
            return Err(ConfigError::invalid(
                "realtime.zone_topic_prefix",
                format!("expected a non-empty name without spaces, got '{}'", rt.zone_topic_prefix),
            ));
        }
        if self.api.timeout.is_zero() {
            return Err(ConfigError::invalid("api.timeout", "must be greater than zero"));
        }
        self.api.base_url()?;
        Ok(())
    }

    /// Build the multiplexer configuration.
    pub fn realtime_config(&self) -> Result<RealtimeConfig, ConfigError> {
        self.validate()?;
        let rt = &self.realtime;
        Ok(RealtimeConfig {
            resubscribe_debounce: rt.resubscribe_debounce,
            pending_poll_interval: rt.pending_poll_interval,
            pending_max_polls: (rt.pending_max_polls > 0).then_some(rt.pending_max_polls),
            resync_snapshots_on_reconnect: rt.resync_snapshots_on_reconnect,
            global_topic: rt.global_topic.clone(),
            global_auth: rt.global_auth,
            zone_topic_prefix: rt.zone_topic_prefix.clone(),
            unavailable_message: rt.unavailable_message.clone(),
        })
    }

    /// Build the snapshot client, or `None` when no backend is configured.
    pub fn snapshot_client(&self) -> Result<Option<SnapshotClient>, ConfigError> {
        let Some(base_url) = self.api.base_url()? else {
            return Ok(None);
        };
        let token = self.api.resolve_token();
        let client = SnapshotClient::new(base_url, token.as_ref(), &self.api.http_config())?;
        Ok(Some(client))
    }
}

impl ApiSection {
    /// Parsed base URL, normalized to end in `/` so endpoint paths join
    /// below it rather than replacing its last segment.
    pub fn base_url(&self) -> Result<Option<Url>, ConfigError> {
        let Some(raw) = self.base_url.as_deref().map(str::trim) else {
            return Ok(None);
        };
        let mut url: Url = raw
            .parse()
            .map_err(|_| ConfigError::invalid("api.base_url", format!("invalid URL: {raw}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                "api.base_url",
                format!("expected http or https, got '{}'", url.scheme()),
            ));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Some(url))
    }

    /// Resolve the bearer token: `token_env` first, then the plaintext value.
    pub fn resolve_token(&self) -> Option<SecretString> {
        if let Some(ref env_name) = self.token_env {
            if let Ok(val) = std::env::var(env_name) {
                return Some(SecretString::from(val));
            }
        }
        self.token.clone().map(SecretString::from)
    }

    pub fn http_config(&self) -> HttpConfig {
        let tls = if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca_path) = self.ca_cert {
            TlsMode::CustomCa(ca_path.clone())
        } else {
            TlsMode::System
        };
        HttpConfig {
            tls,
            timeout: self.timeout,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "greenlink", "greenlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("greenlink");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then the environment.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment. A missing file is not
/// an error; the defaults apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let config: Config = figment(path).extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.realtime_config().unwrap(), RealtimeConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
[realtime]
resubscribe_debounce = "500ms"
pending_max_polls = 0
global_auth = "public"
zone_topic_prefix = "zone-commands"

[api]
base_url = "https://greenhouse.local/backend"
timeout = "5s"
"#,
        );
        let cfg = load_config_from(&path).unwrap();
        let rt = cfg.realtime_config().unwrap();
        assert_eq!(rt.resubscribe_debounce, Duration::from_millis(500));
        assert_eq!(rt.pending_max_polls, None);
        assert_eq!(rt.global_auth, AuthMode::Public);
        assert_eq!(rt.zone_topic_prefix, "zone-commands");
        assert_eq!(rt.pending_poll_interval, Duration::from_secs(1));

        let url = cfg.api.base_url().unwrap().unwrap();
        assert_eq!(url.as_str(), "https://greenhouse.local/backend/");
        assert_eq!(cfg.api.http_config().timeout, Duration::from_secs(5));
    }

    #[test]
    fn later_layers_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[realtime]\nglobal_topic = \"from-file\"\n");
        let cfg: Config = figment(&path)
            .merge(Toml::string("[realtime]\nglobal_topic = \"from-override\"\n"))
            .extract()
            .unwrap();
        assert_eq!(cfg.realtime.global_topic, "from-override");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[realtime]\npending_poll_interval = \"0s\"\n");
        let err = load_config_from(&path).unwrap_err();
        assert!(
            matches!(err, ConfigError::Validation { ref field, .. } if field == "realtime.pending_poll_interval")
        );

        let path = write(&dir, "[api]\nbase_url = \"ftp://greenhouse.local\"\n");
        assert!(matches!(
            load_config_from(&path).unwrap_err(),
            ConfigError::Validation { .. }
        ));

        let path = write(&dir, "[realtime]\nresubscribe_debounce = \"soon\"\n");
        assert!(matches!(
            load_config_from(&path).unwrap_err(),
            ConfigError::Figment(_)
        ));
    }

    #[test]
    fn tls_mode_follows_api_section() {
        let mut api = ApiSection::default();
        assert_eq!(api.http_config().tls, TlsMode::System);

        api.ca_cert = Some(PathBuf::from("/etc/greenlink/ca.pem"));
        assert_eq!(
            api.http_config().tls,
            TlsMode::CustomCa(PathBuf::from("/etc/greenlink/ca.pem"))
        );

        api.insecure = true;
        assert_eq!(api.http_config().tls, TlsMode::DangerAcceptInvalid);
    }

    #[test]
    fn plaintext_token_is_used_without_token_env() {
        let api = ApiSection {
            token: Some("s3cret".into()),
            token_env: Some("GREENLINK_TEST_TOKEN_THAT_IS_NOT_SET".into()),
            ..ApiSection::default()
        };
        assert_eq!(api.resolve_token().unwrap().expose_secret(), "s3cret");
        assert!(ApiSection::default().resolve_token().is_none());
    }

    #[test]
    fn no_base_url_means_no_snapshot_client() {
        assert!(Config::default().snapshot_client().unwrap().is_none());

        let cfg = Config {
            api: ApiSection {
                base_url: Some("http://127.0.0.1:9".into()),
                ..ApiSection::default()
            },
            ..Config::default()
        };
        let client = cfg.snapshot_client().unwrap().unwrap();
        assert_eq!(client.base_url().as_str(), "http://127.0.0.1:9/");
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.realtime.resubscribe_debounce = Duration::from_millis(750);
        cfg.api.base_url = Some("https://greenhouse.local/".into());

        save_config_to(&cfg, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("resubscribe_debounce = \"750ms\""));
        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }
}
