//! Event frame format
//!
//! Every WebSocket text frame carries one JSON object:
//!
//! ```json
//! {"event": "terminal_input", "data": "ls\n"}
//! ```
//!
//! Clients may wrap the payload in a one-element array (`"data": [{...}]`);
//! the wrapper is removed before decoding.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ChannelError;

/// Frame received from a client
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text)
            .map_err(|e| ChannelError::MalformedPayload(format!("Malformed frame: {}", e)))
    }
}

/// Frame sent to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub event: String,
    pub data: Value,
}

/// Strip an array wrapper: `[x, ...]` becomes `x`, `[]` becomes `null`
pub fn unwrap_payload(data: Value) -> Value {
    match data {
        Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
        other => other,
    }
}

/// Decode a payload into `T`, reporting failures with `message`
pub fn decode_payload<T: DeserializeOwned>(data: Value, message: &str) -> Result<T, ChannelError> {
    serde_json::from_value(data).map_err(|e| {
        tracing::debug!("Payload rejected: {}", e);
        ChannelError::MalformedPayload(message.to_string())
    })
}
