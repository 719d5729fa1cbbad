/*
    codec.rs - Envelope encoding

    Every payload on the data opcode is a `SyncMessage`; every payload on the
    handshake opcode is a `HandshakeMessage`. Both formats carry the same
    serde model, so participants only need to agree on the format.
*/

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core_vars::ValueBatch;

/// Payload encoding used on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Json,
    Bincode,
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireFormat::Json => f.write_str("json"),
            WireFormat::Bincode => f.write_str("bincode"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "bincode" => Ok(WireFormat::Bincode),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode codec error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Unknown wire format: {0}")]
    UnknownFormat(String),
}

/// Envelope on the data opcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    Data(ValueBatch),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Codec {
    format: WireFormat,
}

impl Codec {
    pub fn new(format: WireFormat) -> Self {
        Codec { format }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, CodecError> {
        match self.format {
            WireFormat::Json => Ok(serde_json::to_vec(message)?),
            WireFormat::Bincode => Ok(bincode::serialize(message)?),
        }
    }

    /// Decode a payload produced by a peer with the same wire format
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, CodecError> {
        match self.format {
            WireFormat::Json => Ok(serde_json::from_slice(payload)?),
            WireFormat::Bincode => Ok(bincode::deserialize(payload)?),
        }
    }
}
