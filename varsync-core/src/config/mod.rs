//! Configuration management for varsync
//!
//! Defaults, `VARSYNC_*` environment overrides and TOML files. Every
//! participant of a match must agree on the `session` section; the other
//! sections are local.

use serde::{Deserialize, Serialize};
use std::env;

mod error;

pub use error::ConfigError;

use crate::core_sync::channel::SyncOpcodes;
use crate::core_sync::codec::WireFormat;

/// Default opcode for handshake envelopes
pub const DEFAULT_HANDSHAKE_OPCODE: i64 = 100;

/// Default opcode for replicated value batches
pub const DEFAULT_DATA_OPCODE: i64 = 101;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Match-wide replication settings
    pub session: SessionConfig,

    pub logging: LoggingConfig,

    pub metrics: MetricsConfig,
}

/// Replication settings shared by every participant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Opcode reserved for handshake requests and responses
    pub handshake_opcode: i64,

    /// Opcode reserved for value batches
    pub data_opcode: i64,

    /// Payload encoding
    pub wire_format: WireFormat,

    /// Buffered events per subscriber before lagging receivers drop events
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_target: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Record replication counters through the `metrics` facade
    pub enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_opcode: DEFAULT_HANDSHAKE_OPCODE,
            data_opcode: DEFAULT_DATA_OPCODE,
            wire_format: WireFormat::Json,
            event_capacity: 256,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl SessionConfig {
    /// The validated opcode pair
    pub fn opcodes(&self) -> Result<SyncOpcodes, ConfigError> {
        SyncOpcodes::new(self.handshake_opcode, self.data_opcode)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Env {
                var: name.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Variables follow the pattern `VARSYNC_<SECTION>_<KEY>`, for example
    /// `VARSYNC_SESSION_DATA_OPCODE=7`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment variables on an existing configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(opcode) = parse_env("VARSYNC_SESSION_HANDSHAKE_OPCODE")? {
            self.session.handshake_opcode = opcode;
        }
        if let Some(opcode) = parse_env("VARSYNC_SESSION_DATA_OPCODE")? {
            self.session.data_opcode = opcode;
        }
        if let Some(format) = parse_env("VARSYNC_SESSION_WIRE_FORMAT")? {
            self.session.wire_format = format;
        }
        if let Some(capacity) = parse_env("VARSYNC_SESSION_EVENT_CAPACITY")? {
            self.session.event_capacity = capacity;
        }

        if let Ok(level) = env::var("VARSYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = parse_env("VARSYNC_LOG_JSON")? {
            self.logging.json_format = json;
        }

        if let Some(enabled) = parse_env("VARSYNC_METRICS_ENABLED")? {
            self.metrics.enabled = enabled;
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.opcodes()?;

        if self.session.event_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "session.event_capacity",
                message: "must be greater than 0".to_string(),
            });
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid {
                field: "logging.level",
                message: format!("unknown level {:?}", self.logging.level),
            });
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        let path = path.as_ref();
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
