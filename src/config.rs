use crate::logger::{LogLevel, LogOutput, LoggerConfig, DEFAULT_SLOW_THRESHOLD};
use anyhow::{anyhow, Result};
use config::Config;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `LAZYDB_CONNECTION_STRING`
pub const ENV_PREFIX: &str = "LAZYDB";

/// Behavior configuration handed to the dialect when the connection opens
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerConfig {
    pub logger: LoggerConfig,
}

impl ManagerConfig {
    pub fn with_logger(logger: LoggerConfig) -> Self {
        Self { logger }
    }
}

/// Connection settings loaded from a config file and the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Dialect name, e.g. `sqlite`
    pub dialect: String,

    /// Driver-specific connection string
    pub connection_string: String,

    pub log_level: LogLevel,

    pub log_output: LogOutput,

    /// Slow statement threshold in milliseconds (default: 1000)
    pub slow_threshold_ms: u64,

    pub colorful: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            dialect: "sqlite".to_string(),
            connection_string: ":memory:".to_string(),
            log_level: LogLevel::Error,
            log_output: LogOutput::Stdout,
            slow_threshold_ms: DEFAULT_SLOW_THRESHOLD.as_millis() as u64,
            colorful: true,
        }
    }
}

impl ManagerSettings {
    /// Load settings from `path` (or `~/.lazydb/lazydb.toml` when present)
    /// and from `LAZYDB_*` environment variables
    pub fn load(path: Option<&str>) -> Result<ManagerSettings> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Same as [`ManagerSettings::load`] with a custom environment prefix
    pub fn load_with_prefix(path: Option<&str>, env_prefix: &str) -> Result<ManagerSettings> {
        // Pull a `.env` file into the environment if there is one
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();

        match path {
            Some(p) => {
                if !Path::new(p).exists() {
                    return Err(anyhow!("Configuration file '{}' does not exist", p));
                }
                builder = builder.add_source(config::File::with_name(p));
            }
            None => {
                if let Some(p) = Self::config_file_path() {
                    if Path::new(p.as_str()).exists() {
                        builder = builder.add_source(config::File::with_name(p.as_str()));
                    }
                }
            }
        }

        builder = builder.add_source(config::Environment::with_prefix(env_prefix));

        let settings = builder
            .build()
            .map_err(|e| anyhow!("Failed to build configuration: {}", e))?;

        let map = settings
            .try_deserialize::<HashMap<String, String>>()
            .map_err(|e| anyhow!("Failed to deserialize configuration: {}", e))?;

        Self::from_map(&map)
    }

    /// Build settings from flat key/value pairs, falling back to defaults
    pub fn from_map(map: &HashMap<String, String>) -> Result<ManagerSettings> {
        let defaults = ManagerSettings::default();

        let dialect = map
            .get("dialect")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or(defaults.dialect);

        let connection_string = map
            .get("connection_string")
            .cloned()
            .unwrap_or(defaults.connection_string);

        let log_level = match map.get("log_level") {
            Some(s) => s.parse()?,
            None => defaults.log_level,
        };

        let log_output = match map.get("log_output") {
            Some(s) => s.parse()?,
            None => defaults.log_output,
        };

        let slow_threshold_ms = map
            .get("slow_threshold_ms")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.slow_threshold_ms);

        let colorful = map
            .get("colorful")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.colorful);

        Ok(ManagerSettings {
            dialect,
            connection_string,
            log_level,
            log_output,
            slow_threshold_ms,
            colorful,
        })
    }

    /// Default config file location
    pub fn config_file_path() -> Option<String> {
        dirs::home_dir().map(|h| format!("{}/.lazydb/lazydb.toml", h.to_string_lossy()))
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_threshold_ms)
    }

    /// Build the configuration passed to the manager
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::with_logger(LoggerConfig {
            output: self.log_output,
            slow_threshold: self.slow_threshold(),
            level: self.log_level,
            colorful: self.colorful,
        })
    }

    /// Display settings summary
    pub fn summary(&self) -> String {
        [
            format!("Dialect:            {}", self.dialect),
            format!("Connection String:  {}", self.connection_string),
            format!("Log Level:          {}", self.log_level),
            format!("Log Output:         {:?}", self.log_output),
            format!("Slow Threshold:     {} ms", self.slow_threshold_ms),
            format!("Colorful:           {}", self.colorful),
        ]
        .join("\n")
    }
}
