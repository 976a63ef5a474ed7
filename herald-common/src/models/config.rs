// File: herald-common/src/models/config.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Presence state advertised by connected accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    #[default]
    Online,
    Idle,
    Invisible,
    Dnd,
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnlineStatus::Online => write!(f, "online"),
            OnlineStatus::Idle => write!(f, "idle"),
            OnlineStatus::Invisible => write!(f, "invisible"),
            OnlineStatus::Dnd => write!(f, "dnd"),
        }
    }
}

impl FromStr for OnlineStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "online" => Ok(OnlineStatus::Online),
            "idle" => Ok(OnlineStatus::Idle),
            "invisible" => Ok(OnlineStatus::Invisible),
            "dnd" => Ok(OnlineStatus::Dnd),
            _ => Err(format!("Unknown online status: {}", s)),
        }
    }
}

/// Engine configuration as written by the dashboard. Immutable within a
/// run except for `advertisement_message`, which may be hot-reloaded;
/// the remaining fields take effect on the next start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub advertisement_message: String,

    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    #[serde(default = "default_cooldown_minutes")]
    pub default_cooldown_minutes: u64,

    #[serde(default)]
    pub online_status: OnlineStatus,

    #[serde(default = "default_true")]
    pub use_proxies: bool,

    #[serde(default = "default_true")]
    pub keep_accounts_online: bool,
}

fn default_interval_minutes() -> u64 {
    60
}

fn default_cooldown_minutes() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            advertisement_message: String::new(),
            interval_minutes: default_interval_minutes(),
            default_cooldown_minutes: default_cooldown_minutes(),
            online_status: OnlineStatus::Online,
            use_proxies: true,
            keep_accounts_online: true,
        }
    }
}

impl EngineConfig {
    /// Checks the fields a run cannot start without.
    pub fn validate(&self) -> Result<(), Error> {
        if self.advertisement_message.trim().is_empty() {
            return Err(Error::ConfigInvalid(
                "advertisement message is empty".to_string(),
            ));
        }
        if self.interval_minutes == 0 {
            return Err(Error::ConfigInvalid(
                "interval must be at least one minute".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dashboard_expectations() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.interval_minutes, 60);
        assert_eq!(cfg.default_cooldown_minutes, 60);
        assert_eq!(cfg.online_status, OnlineStatus::Online);
        assert!(cfg.use_proxies);
        assert!(cfg.keep_accounts_online);
    }

    #[test]
    fn empty_message_fails_validation() {
        let cfg = EngineConfig::default();
        assert!(matches!(cfg.validate(), Err(Error::ConfigInvalid(_))));

        let cfg = EngineConfig {
            advertisement_message: "hello".to_string(),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn online_status_round_trips() {
        for s in ["online", "idle", "invisible", "dnd"] {
            let parsed: OnlineStatus = s.parse().unwrap();
            assert_eq!(parsed.to_string(), s);
        }
        assert!("away".parse::<OnlineStatus>().is_err());
    }
}
