use crate::error::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message sent to the remote side.
///
/// `mid` is only present when a reply is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    pub action: String,
    pub model: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

/// Message received from the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutboundEnvelope {
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

impl InboundEnvelope {
    /// Reply carrying `data` for the request `mid`.
    pub fn reply(mid: impl Into<String>, data: Value) -> Self {
        Self {
            mid: Some(mid.into()),
            data,
            error: None,
        }
    }

    /// Reply reporting a remote failure for the request `mid`.
    pub fn failure(mid: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            mid: Some(mid.into()),
            data: Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn decode(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))
    }

    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}
