//! Runner/controller wire protocol
//!
//! Messages travel over a WebSocket. Text frames carry JSON, binary frames
//! carry MessagePack; a reply uses the encoding of the request it answers.

pub mod count_map;
mod messages;

pub use messages::*;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Frame encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Json,
    MessagePack,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid MessagePack message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Failed to encode MessagePack message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

impl Encoding {
    pub fn encode<T: Serialize>(self, msg: &T) -> Result<Vec<u8>, ProtocolError> {
        match self {
            Encoding::Json => Ok(serde_json::to_vec(msg)?),
            // Named fields keep the `type` tag and optional fields intact
            Encoding::MessagePack => Ok(rmp_serde::to_vec_named(msg)?),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T, ProtocolError> {
        match self {
            Encoding::Json => Ok(serde_json::from_slice(bytes)?),
            Encoding::MessagePack => Ok(rmp_serde::from_slice(bytes)?),
        }
    }
}
