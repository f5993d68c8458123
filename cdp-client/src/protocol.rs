// CDP protocol definitions and frame handling
//
// Reference: https://chromedevtools.github.io/devtools-protocol/

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

// Every frame is a UTF-8 JSON text message. Commands carry an id chosen by
// the client; replies echo it back. Anything without an id is an event.

pub type CdpResult<T> = Result<T, CdpError>;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("CDP error code {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("Command id={id} timed out after {after:?}")]
    Timeout { id: u64, after: Duration },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Target discovery failed: {0}")]
    Discovery(String),
}

impl CdpError {
    /// True when the local wait expired; the remote side may still run the command.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CdpError::Timeout { .. })
    }
}

/// Outbound command record
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl Command {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn encode(&self) -> CdpResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error object carried by a failed reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reply to a command, matched by id
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl Reply {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn check_error(&self) -> CdpResult<()> {
        match &self.error {
            Some(err) => Err(CdpError::Remote {
                code: err.code,
                message: err.message.clone(),
            }),
            None => Ok(()),
        }
    }

    /// The result payload, or null when the target sent none
    pub fn result(&self) -> &Value {
        static EMPTY: Value = Value::Null;
        self.result.as_ref().unwrap_or(&EMPTY)
    }

    pub fn into_result(self) -> CdpResult<Value> {
        self.check_error()?;
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Unsolicited notification pushed by the target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// An inbound text frame, classified
#[derive(Debug, Clone)]
pub enum Frame {
    Reply(Reply),
    Event(Event),
}

impl Frame {
    pub fn decode(text: &str) -> CdpResult<Self> {
        let value: Value = serde_json::from_str(text)?;

        // Discriminate by id field
        if value.get("id").is_some() {
            let reply = serde_json::from_value::<Reply>(value)
                .map_err(|e| CdpError::Protocol(format!("Malformed reply: {}", e)))?;
            return Ok(Frame::Reply(reply));
        }

        if value.get("method").is_some() {
            let event = serde_json::from_value::<Event>(value)
                .map_err(|e| CdpError::Protocol(format!("Malformed event: {}", e)))?;
            return Ok(Frame::Event(event));
        }

        Err(CdpError::Protocol(
            "Frame has neither id nor method".to_string(),
        ))
    }
}
