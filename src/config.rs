use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::dom::InputKind;

pub const DEFAULT_FLAG_KEY: &str = "globalEnabled";
const DEFAULT_GESTURE_WINDOW_MS: u64 = 5_000;
const DEFAULT_LOAD_CHECK_DELAY_MS: u64 = 800;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read engine config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid engine config: {0}")]
    Invalid(String),
}

/// How overlapping gesture windows combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    /// The window stays open until the most recent gesture's deadline.
    #[default]
    Rolling,
    /// Every gesture's expiry closes the window, even if a later gesture
    /// started a newer one.
    Independent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub flag_key: String,
    pub gesture_window_ms: u64,
    pub gesture_events: Vec<InputKind>,
    pub window_mode: WindowMode,
    pub watched_attributes: Vec<String>,
    pub navigation: NavigationHintConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flag_key: DEFAULT_FLAG_KEY.to_string(),
            gesture_window_ms: DEFAULT_GESTURE_WINDOW_MS,
            gesture_events: vec![
                InputKind::PointerDown,
                InputKind::KeyDown,
                InputKind::MouseDown,
                InputKind::TouchStart,
            ],
            window_mode: WindowMode::default(),
            watched_attributes: vec!["autoplay".to_string(), "preload".to_string()],
            navigation: NavigationHintConfig::default(),
        }
    }
}

/// Site nudges for hosts whose players autoplay across in-page navigations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigationHintConfig {
    pub enabled: bool,
    pub host_suffixes: Vec<String>,
    pub exact_hosts: Vec<String>,
    pub preferences: BTreeMap<String, String>,
    pub settle_event: String,
    pub settle_delay_ms: u64,
    pub load_check_delay_ms: u64,
}

impl Default for NavigationHintConfig {
    fn default() -> Self {
        let preferences = [
            ("yt-player-autoplay", "false"),
            ("yt.autonav::autonav_disabled", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            enabled: true,
            host_suffixes: vec!["youtube.com".to_string()],
            exact_hosts: vec!["youtu.be".to_string()],
            preferences,
            settle_event: "yt-navigate-finish".to_string(),
            settle_delay_ms: 0,
            load_check_delay_ms: DEFAULT_LOAD_CHECK_DELAY_MS,
        }
    }
}

impl NavigationHintConfig {
    pub fn matches_host(&self, host: &str) -> bool {
        self.exact_hosts.iter().any(|exact| exact == host)
            || self.host_suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn load_check_delay(&self) -> Duration {
        Duration::from_millis(self.load_check_delay_ms)
    }
}

impl EngineConfig {
    /// Load from a YAML file, falling back to defaults when no path is given
    /// or the file does not exist.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str(&contents)?
            }
            _ => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flag_key.trim().is_empty() {
            return Err(ConfigError::Invalid("flag_key must not be empty".into()));
        }
        if self.gesture_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "gesture_window_ms must be greater than zero".into(),
            ));
        }
        if self.gesture_events.is_empty() {
            return Err(ConfigError::Invalid(
                "gesture_events must list at least one input".into(),
            ));
        }
        Ok(())
    }

    pub fn gesture_window(&self) -> Duration {
        Duration::from_millis(self.gesture_window_ms)
    }
}
