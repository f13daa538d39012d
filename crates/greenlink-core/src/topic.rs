// ── Topics ──
//
// A topic names one logical event stream. Scoped topics belong to a single
// zone and always use a private (authorized) channel; the global topic is a
// process-wide singleton whose authorization mode is configurable.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use greenlink_api::EntityId;

use crate::config::RealtimeConfig;
use crate::error::CoreError;

/// Event names bound on zone command channels.
pub const ZONE_EVENTS: &[&str] = &[
    "CommandStatusUpdated",
    "CommandCompleted",
    "CommandFailed",
    "ZoneSnapshot",
];

/// Event names bound on the global channel.
pub const GLOBAL_EVENTS: &[&str] = &[
    "EventCreated",
    "AlertRaised",
    "TelemetryUpdated",
    "NodeStatusChanged",
];

/// Cheaply cloneable channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicName(Arc<str>);

impl TopicName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TopicName {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for TopicName {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Borrow<str> for TopicName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which transport handshake a channel uses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuthMode {
    Private,
    Public,
}

/// Scoped (per zone) or global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Scoped { entity: EntityId },
    Global,
}

impl TopicKind {
    pub fn is_global(self) -> bool {
        matches!(self, Self::Global)
    }

    pub fn entity(self) -> Option<EntityId> {
        match self {
            Self::Scoped { entity } => Some(entity),
            Self::Global => None,
        }
    }

    /// Transport event names a channel of this kind listens to.
    pub fn event_names(self) -> &'static [&'static str] {
        match self {
            Self::Scoped { .. } => ZONE_EVENTS,
            Self::Global => GLOBAL_EVENTS,
        }
    }
}

/// A fully described topic: name, kind and authorization mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    name: TopicName,
    kind: TopicKind,
    auth: AuthMode,
}

impl Topic {
    /// Command events of one zone, e.g. `commands.12`.
    pub fn zone_commands(prefix: &str, entity: EntityId) -> Self {
        Self {
            name: TopicName::from(format!("{prefix}.{entity}")),
            kind: TopicKind::Scoped { entity },
            auth: AuthMode::Private,
        }
    }

    /// The process-wide global event stream.
    pub fn global(name: &str, auth: AuthMode) -> Self {
        Self {
            name: TopicName::from(name),
            kind: TopicKind::Global,
            auth,
        }
    }

    /// Resolve a channel name against the configured naming scheme.
    pub fn parse(name: &str, config: &RealtimeConfig) -> Result<Self, CoreError> {
        if name == config.global_topic {
            return Ok(Self::global(name, config.global_auth));
        }

        let invalid = |reason: &str| CoreError::InvalidTopic {
            topic: name.to_owned(),
            reason: reason.to_owned(),
        };

        let (prefix, id) = name
            .rsplit_once('.')
            .ok_or_else(|| invalid("expected '<prefix>.<zone id>'"))?;
        if prefix != config.zone_topic_prefix {
            return Err(invalid("unknown topic prefix"));
        }
        let id: u64 = id.parse().map_err(|_| invalid("zone id is not a number"))?;
        Ok(Self::zone_commands(prefix, EntityId::new(id)))
    }

    pub fn name(&self) -> &TopicName {
        &self.name
    }

    pub fn kind(&self) -> TopicKind {
        self.kind
    }

    pub fn auth(&self) -> AuthMode {
        self.auth
    }

    pub fn entity(&self) -> Option<EntityId> {
        self.kind.entity()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.auth)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn zone_topic_is_private_and_scoped() {
        let topic = Topic::zone_commands("commands", EntityId::new(12));
        assert_eq!(topic.name().as_str(), "commands.12");
        assert_eq!(topic.auth(), AuthMode::Private);
        assert_eq!(topic.entity(), Some(EntityId::new(12)));
    }

    #[test]
    fn parse_recognises_both_kinds() {
        let cfg = RealtimeConfig::default();
        let zone = Topic::parse("commands.7", &cfg).unwrap();
        assert_eq!(zone.kind(), TopicKind::Scoped { entity: EntityId::new(7) });

        let global = Topic::parse("events.global", &cfg).unwrap();
        assert!(global.kind().is_global());
        assert_eq!(global.auth(), cfg.global_auth);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        let cfg = RealtimeConfig::default();
        assert!(matches!(
            Topic::parse("telemetry.7", &cfg),
            Err(CoreError::InvalidTopic { .. })
        ));
        assert!(Topic::parse("commands.seven", &cfg).is_err());
        assert!(Topic::parse("commands", &cfg).is_err());
    }
}
