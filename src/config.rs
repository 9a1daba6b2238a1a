//! Application Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/grabber.toml` (or the path given on the command line)
//! 2. Environment variables prefixed with `GRABBER_DAQ_`, nested keys split on `__`
//!
//! Example: `GRABBER_DAQ_APPLICATION__LOG_LEVEL=debug`
//!
//! ```no_run
//! use grabber_daq::config::AppConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::load()?;
//! config.validate()?;
//! println!("{} channel(s) configured", config.channels.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use daq_driver_grabber::{ChannelConfig, GrabberError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/grabber.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "GRABBER_DAQ_";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Reading or merging the providers failed
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A top-level setting is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// A channel entry is invalid
    #[error("Invalid channel #{index}: {source}")]
    Channel {
        index: usize,
        #[source]
        source: GrabberError,
    },
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Which native layer drives the channels
    #[serde(default)]
    pub backend: BackendConfig,
    /// Channels to open
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Native layer selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process frame generator
    #[default]
    Mock,
    /// Vendor library (requires the `grabber_sdk` feature)
    Sdk,
}

/// Backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Native layer to use
    #[serde(default)]
    pub kind: BackendKind,
    /// Driver instance name passed to the vendor library (default instance if unset)
    #[serde(default)]
    pub driver_name: Option<String>,
    /// Frame period of the mock generator
    #[serde(default = "default_mock_frame_period", with = "humantime_serde")]
    pub mock_frame_period: Duration,
    /// Number of surfaces the mock generator cycles through
    #[serde(default = "default_mock_pool_size")]
    pub mock_pool_size: u32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            driver_name: None,
            mock_frame_period: default_mock_frame_period(),
            mock_pool_size: default_mock_pool_size(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_mock_frame_period() -> Duration {
    // ~30 fps
    Duration::from_millis(33)
}

fn default_mock_pool_size() -> u32 {
    4
}

impl AppConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.backend.kind == BackendKind::Mock && self.backend.mock_frame_period.is_zero() {
            return Err(ConfigError::Invalid(
                "mock_frame_period must be greater than zero".to_string(),
            ));
        }

        if self.channels.is_empty() {
            return Err(ConfigError::Invalid(
                "At least one channel must be configured".to_string(),
            ));
        }

        let mut sources = HashSet::new();
        for (index, channel) in self.channels.iter().enumerate() {
            channel
                .validate()
                .map_err(|source| ConfigError::Channel { index, source })?;
            if !sources.insert(channel.source_index) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate source_index: {}",
                    channel.source_index
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    const SAMPLE: &str = r#"
        [application]
        log_level = "debug"
        log_format = "compact"

        [backend]
        kind = "mock"
        mock_frame_period = "10ms"

        [[channels]]
        source_index = 0
        connector = "VID1"
        standard = "NTSC"

        [[channels]]
        source_index = 1
        connector = "VID2"
        standard = "PAL"
        wait_timeout = "500ms"
    "#;

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_config(SAMPLE);
        let config = AppConfig::load_from(file.path()).unwrap();

        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.backend.kind, BackendKind::Mock);
        assert_eq!(config.backend.mock_frame_period, Duration::from_millis(10));
        assert_eq!(config.backend.mock_pool_size, 4);
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[1].standard, "PAL");
        assert_eq!(config.channels[1].wait_timeout, Duration::from_millis(500));
        assert_eq!(config.channels[0].model, "Channel");
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config(SAMPLE);
        std::env::set_var("GRABBER_DAQ_APPLICATION__LOG_LEVEL", "warn");
        let config = AppConfig::load_from(file.path());
        std::env::remove_var("GRABBER_DAQ_APPLICATION__LOG_LEVEL");

        assert_eq!(config.unwrap().application.log_level, "warn");
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.backend.kind, BackendKind::Mock);
        assert!(config.channels.is_empty());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig {
            channels: vec![ChannelConfig::default()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_channel_reported_with_index() {
        let config = AppConfig {
            channels: vec![
                ChannelConfig::default(),
                ChannelConfig::new(1, "VID2", ""),
            ],
            ..Default::default()
        };

        match config.validate() {
            Err(ConfigError::Channel { index, .. }) => assert_eq!(index, 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_sources_rejected() {
        let config = AppConfig {
            channels: vec![ChannelConfig::default(), ChannelConfig::default()],
            ..Default::default()
        };

        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
