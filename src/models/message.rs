use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{models::error::DispatchError, utils::normalize};

pub type Payload = Map<String, Value>;

/// A raw delivery as handed over by a broker backend.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: Vec<u8>,
    pub delivery_tag: Option<u64>,
}

impl BrokerMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
            delivery_tag: None,
        }
    }

    pub fn with_delivery_tag(mut self, delivery_tag: u64) -> Self {
        self.delivery_tag = Some(delivery_tag);
        self
    }
}

/// A decoded broker event. Consumed once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent {
    pub channel: String,
    pub payload: Payload,
}

impl ChannelEvent {
    pub fn new(channel: impl Into<String>, payload: Payload) -> Self {
        Self {
            channel: channel.into(),
            payload,
        }
    }

    /// Decodes a wire payload. Only JSON objects are accepted.
    pub fn decode(channel: &str, raw: &[u8]) -> Result<Self, DispatchError> {
        let value = serde_json::from_slice::<Value>(raw).map_err(|e| DispatchError::Decode {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;

        match value {
            Value::Object(payload) => Ok(Self::new(channel, payload)),
            other => Err(DispatchError::Decode {
                channel: channel.to_string(),
                reason: format!("expected a JSON object, got {}", json_kind(&other)),
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Normalized string value of `key`; absent, null and empty values read as `None`.
    pub fn text(&self, key: &str) -> Option<String> {
        self.payload
            .get(key)
            .map(normalize)
            .filter(|text| !text.trim().is_empty())
    }

    /// Reads an identifier that may arrive as a JSON integer or a numeric string.
    pub fn id(&self, key: &str) -> Result<Option<i64>, Error> {
        match self.payload.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| anyhow!("'{}' must be an integer, got {}", key, n)),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| anyhow!("'{}' must be an integer, got '{}'", key, s)),
            Some(other) => Err(anyhow!(
                "'{}' must be an integer, got {}",
                key,
                json_kind(other)
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub channel: String,
    pub raw_payload: String,
    pub failure_reason: String,
    pub failed_at: String,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
