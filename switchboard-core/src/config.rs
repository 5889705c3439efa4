use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::reconnect::ReconnectPolicy;

/// Conservative default for the number of destinations a single relay may fan out to
pub const DEFAULT_MAX_DESTINATION_CHANNELS: usize = 4;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub providers: ProvidersConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Provider orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Ordered provider ids tried during automatic failover.
    /// Empty means "registered providers in priority order".
    pub fallback_chain: Vec<String>,
    /// Switch away automatically when the current provider turns unhealthy
    pub auto_fallback: bool,
    pub health: HealthConfig,
    /// Provider-level reconnection after a lost connection
    pub reconnect: ReconnectPolicy,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            fallback_chain: Vec::new(),
            auto_fallback: true,
            health: HealthConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Error-count thresholds driving provider health status
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Errors at which a provider is considered degraded
    pub degraded_threshold: u32,
    /// Errors at which a provider is considered unhealthy
    pub unhealthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_threshold: 1,
            unhealthy_threshold: 3,
        }
    }
}

/// Media relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upper bound on destination channels per relay
    pub max_destination_channels: usize,
    /// Channel-level reconnection after a destination drops
    pub reconnect: ReconnectPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_destination_channels: DEFAULT_MAX_DESTINATION_CHANNELS,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file, then environment overrides.
    ///
    /// Environment variables use the `SWITCHBOARD` prefix and `__` as the
    /// nesting separator, e.g. `SWITCHBOARD__RELAY__MAX_DESTINATION_CHANNELS=8`.
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            } else {
                return Err(Error::Configuration(format!(
                    "config file not found: {path}"
                )));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SWITCHBOARD")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("providers.fallback_chain")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self> {
        Self::load(Some(path))
    }

    /// Reject settings the coordinators cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.relay.max_destination_channels == 0 {
            return Err(Error::Configuration(
                "relay.max_destination_channels must be at least 1".to_string(),
            ));
        }

        let health = &self.providers.health;
        if health.degraded_threshold == 0 || health.unhealthy_threshold < health.degraded_threshold {
            return Err(Error::Configuration(format!(
                "invalid health thresholds: degraded={} unhealthy={}",
                health.degraded_threshold, health.unhealthy_threshold
            )));
        }

        self.providers.reconnect.validate()?;
        self.relay.reconnect.validate()?;

        let mut seen = HashSet::new();
        for provider in &self.providers.fallback_chain {
            if !seen.insert(provider.as_str()) {
                return Err(Error::DuplicateProvider(provider.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.relay.max_destination_channels,
            DEFAULT_MAX_DESTINATION_CHANNELS
        );
        assert!(config.providers.auto_fallback);
        assert!(config.providers.fallback_chain.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[providers]
fallback_chain = ["agora", "trtc"]
auto_fallback = false

[providers.reconnect]
max_attempts = 7
initial_delay_ms = 250

[relay]
max_destination_channels = 6
"#
        )
        .unwrap();

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.providers.fallback_chain, vec!["agora", "trtc"]);
        assert!(!config.providers.auto_fallback);
        assert_eq!(config.providers.reconnect.max_attempts, 7);
        assert_eq!(
            config.providers.reconnect.initial_delay(),
            Duration::from_millis(250)
        );
        assert_eq!(config.relay.max_destination_channels, 6);
        // untouched sections keep their defaults
        assert_eq!(config.providers.health.unhealthy_threshold, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = Config::from_file("/nonexistent/switchboard.toml");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_cardinality() {
        let mut config = Config::default();
        config.relay.max_destination_channels = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_chain_entries() {
        let mut config = Config::default();
        config.providers.fallback_chain = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        assert!(matches!(
            config.validate(),
            Err(Error::DuplicateProvider(p)) if p == "a"
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = Config::default();
        config.providers.health.degraded_threshold = 5;
        config.providers.health.unhealthy_threshold = 2;
        assert!(config.validate().is_err());
    }
}
