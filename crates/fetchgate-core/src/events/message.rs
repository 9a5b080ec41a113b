//! Push event frames
//!
//! The events channel carries JSON text frames of the form
//! `{"event": "<name>", "data": <any JSON>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One server-pushed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl PushEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Decode a text frame
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Decode a binary frame holding UTF-8 JSON
    pub fn decode_bytes(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn encode(&self) -> String {
        // A String key and a Value always serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}
