//! Fanout job wire format
//!
//! Queue messages are JSON with the payload carried as base64 so the bytes
//! survive any transport verbatim. One message carries at most
//! `FANOUT_QUEUE_BATCH_SIZE` estuary ids; the publish engine chunks before
//! enqueueing.

use serde::{Deserialize, Serialize};

use super::error::QueueError;
use crate::data::store::ProducerHeaders;

/// One unit of queued fanout work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutJob {
    pub project_id: String,
    /// Source stream the payload was appended to
    pub stream_id: String,
    /// Estuary targets for this chunk
    pub estuary_ids: Vec<String>,
    /// Message bytes, base64 on the wire
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    pub content_type: String,
    /// Fanout producer identity; sinks dedup on it
    pub producer_headers: ProducerHeaders,
}

impl FanoutJob {
    pub fn to_bytes(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|e| QueueError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(bytes).map_err(|e| QueueError::Decode(e.to_string()))
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
