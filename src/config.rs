//! Settings store for the auto-switch engine.

use crate::engine::decision::Policy;
use crate::observer::ObserverConfig;
use crate::remote::RemoteConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable holding the remote classifier API key.
pub const API_KEY_ENV: &str = "AUTOSWITCH_API_KEY";

const APP_DIR: &str = "activity-autoswitch";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Whether the window observer polls at all
    pub auto_detect_enabled: bool,

    /// Whether confident suggestions switch the activity without asking
    pub auto_switch_enabled: bool,

    /// Minimum confidence (0-100) for an automatic switch
    pub confidence_threshold: u8,

    /// Start the timer when an automatic switch happens while idle
    pub start_timer_on_switch: bool,

    /// Foreground window polling interval
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Consecutive identical polls before a title change is confirmed
    pub debounce_polls: u32,

    /// Titles shorter than this after trimming are ignored
    pub min_title_len: usize,

    /// Remote classifier settings
    pub remote: RemoteConfig,

    /// Directory for rules, sessions, activities and stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            auto_detect_enabled: true,
            auto_switch_enabled: false,
            confidence_threshold: 65,
            start_timer_on_switch: false,
            poll_interval: Duration::from_millis(700),
            debounce_polls: 2,
            min_title_len: 2,
            remote: RemoteConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when it is missing.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Config =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.confidence_threshold = config.confidence_threshold.min(100);
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval must be non-zero".into()));
        }
        if self.remote.timeout.is_zero() {
            return Err(ConfigError::Invalid("remote.timeout must be non-zero".into()));
        }
        if self.debounce_polls == 0 {
            return Err(ConfigError::Invalid("debounce_polls must be at least 1".into()));
        }
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn policy(&self) -> Policy {
        Policy {
            auto_switch_enabled: self.auto_switch_enabled,
            confidence_threshold: self.confidence_threshold.min(100),
            start_timer_on_switch: self.start_timer_on_switch,
        }
    }

    pub fn observer_config(&self) -> ObserverConfig {
        ObserverConfig {
            poll_interval: self.poll_interval,
            debounce_polls: self.debounce_polls,
            min_title_len: self.min_title_len,
        }
    }

    pub fn activities_path(&self) -> PathBuf {
        self.data_path.join("activities.json")
    }

    pub fn rules_path(&self) -> PathBuf {
        self.data_path.join("rules.json")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_path.join("sessions.jsonl")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }
}

/// Resolve the API key: explicit value first, then the environment.
pub fn resolve_api_key(explicit: Option<String>) -> Option<String> {
    explicit
        .or_else(|| std::env::var(API_KEY_ENV).ok())
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.auto_detect_enabled);
        assert!(!config.auto_switch_enabled);
        assert_eq!(config.confidence_threshold, 65);
        assert_eq!(config.poll_interval, Duration::from_millis(700));
        assert_eq!(config.remote.timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_round_trip_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.auto_switch_enabled = true;
        config.poll_interval = Duration::from_millis(250);
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);

        std::fs::write(&path, r#"{"confidence_threshold": 80, "remote": {"timeout": 1500}}"#)
            .unwrap();
        let partial = Config::load_from(&path).unwrap();
        assert_eq!(partial.confidence_threshold, 80);
        assert_eq!(partial.remote.timeout, Duration::from_millis(1500));
        assert_eq!(partial.remote.max_retries, 2);
        assert_eq!(partial.debounce_polls, 2);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.confidence_threshold, 65);
    }

    #[test]
    fn test_threshold_clamped_and_zero_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{"confidence_threshold": 200}"#).unwrap();
        assert_eq!(Config::load_from(&path).unwrap().confidence_threshold, 100);

        std::fs::write(&path, r#"{"poll_interval": 0}"#).unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(Config::load_from(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_policy_and_observer_views() {
        let mut config = Config::default();
        config.auto_switch_enabled = true;
        config.start_timer_on_switch = true;
        let policy = config.policy();
        assert!(policy.auto_switch_enabled && policy.start_timer_on_switch);
        assert_eq!(policy.confidence_threshold, 65);
        assert_eq!(config.observer_config().debounce_polls, 2);
    }

    #[test]
    fn test_explicit_api_key_wins() {
        assert_eq!(
            resolve_api_key(Some(" abc123 ".to_string())),
            Some("abc123".to_string())
        );
    }
}
