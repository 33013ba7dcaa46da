//! Runtime configuration

use std::time::Duration;

use rill_core::{RillError, RillResult};
use serde::{Deserialize, Serialize};

/// Where `State::declare` runs for new pages
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// On the calling thread, committed at once
    #[default]
    Inline,
    /// On a single background worker; committed on the writer thread
    Background,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, overridden by `RILL_LOG`
    pub filter: String,
    /// Emit JSON lines instead of the human format
    pub json: bool,
    /// Install the global subscriber when the runtime is built. Off for
    /// hosts that bring their own.
    pub install: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
            install: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Paint tick pacing for `PacedFrameSource`
    pub frame_interval_ms: u64,
    pub discovery: DiscoveryMode,
    pub log: LogConfig,
    /// Install `LoggingMiddleware` on every page store
    pub enable_action_log: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
            discovery: DiscoveryMode::Inline,
            log: LogConfig::default(),
            enable_action_log: false,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> RillResult<Self> {
        let config: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| RillError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> RillResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| RillError::Config(e.to_string()))
    }

    pub fn validate(&self) -> RillResult<()> {
        if self.frame_interval_ms == 0 {
            return Err(RillError::Config("frame_interval_ms must be positive".into()));
        }
        if self.log.filter.trim().is_empty() {
            return Err(RillError::Config("log.filter must not be empty".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn with_discovery(mut self, mode: DiscoveryMode) -> Self {
        self.discovery = mode;
        self
    }

    pub fn with_action_log(mut self, enabled: bool) -> Self {
        self.enable_action_log = enabled;
        self
    }

    pub fn with_logging(mut self, install: bool) -> Self {
        self.log.install = install;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
        assert_eq!(config.discovery, DiscoveryMode::Inline);
        assert_eq!(config.log.filter, "info");
        assert!(!config.log.install);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "discovery": "background", "log": { "json": true } }"#).unwrap();
        assert_eq!(config.discovery, DiscoveryMode::Background);
        assert!(config.log.json);
        assert_eq!(config.log.filter, "info");
        assert_eq!(config.frame_interval_ms, 16);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = RuntimeConfig::from_json(r#"{ "frame_interval_ms": 0 }"#).unwrap_err();
        assert!(matches!(err, RillError::Config(_)));
    }

    #[test]
    fn test_json_roundtrip() {
        let config = RuntimeConfig::default().with_action_log(true);
        let back = RuntimeConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    proptest! {
        #[test]
        fn test_validate_needs_interval_and_filter(interval in 0u64..64, filter in "[ a-z=,]{0,12}") {
            let mut config = RuntimeConfig::default();
            config.frame_interval_ms = interval;
            config.log.filter = filter.clone();
            let valid = interval > 0 && !filter.trim().is_empty();
            prop_assert_eq!(config.validate().is_ok(), valid);
            if valid {
                prop_assert_eq!(config.frame_interval(), Duration::from_millis(interval));
            }
        }
    }
}
