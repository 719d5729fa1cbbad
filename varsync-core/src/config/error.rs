//! Errors raised while loading or checking a session configuration

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write config file {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Cannot encode config: {0}")]
    Encode(#[from] toml::ser::Error),

    /// An environment override that does not parse
    #[error("Bad value in {var}: {message}")]
    Env { var: String, message: String },

    /// Replication would be unable to tell its two message kinds apart
    #[error("Handshake and data opcodes must differ (both {0})")]
    OpcodeClash(i64),

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}
