//! RPC Envelope Types
//!
//! Protocol: single JSON request → single JSON response. Every command
//! interaction (submit, poll, fetch, close) is one round trip.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported RPC operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Returns protocol range and server timing measurements
    /// MUST accept protocol_version: 0 exclusively for this op
    Probe,
    /// Accepts a request for execution, returns a handle
    Submit,
    /// Returns a fresh status snapshot for a handle
    Status,
    /// Returns the terminal response for a handle
    Response,
    /// Requests cancellation of an in-flight handle
    Cancel,
    /// Releases the server-side resources behind a handle
    Close,
}

impl Operation {
    /// Returns true if this operation accepts protocol_version: 0
    pub fn accepts_version_zero(&self) -> bool {
        matches!(self, Operation::Probe)
    }

    /// Wire name of the operation
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Probe => "probe",
            Operation::Submit => "submit",
            Operation::Status => "status",
            Operation::Response => "response",
            Operation::Cancel => "cancel",
            Operation::Close => "close",
        }
    }
}

/// RPC Request envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version (selected by the client after probe)
    /// probe requests MUST use protocol_version: 0
    pub protocol_version: i32,

    /// Operation to perform
    pub op: Operation,

    /// Caller-chosen request ID for correlation
    pub request_id: String,

    /// Operation-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// RPC Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Protocol version (echoed; 0 for probe)
    pub protocol_version: i32,

    /// Echoed request ID for correlation
    pub request_id: String,

    /// Whether the operation succeeded
    pub ok: bool,

    /// Operation-specific payload (present when ok=true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Error details (present when ok=false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorPayload>,
}

impl RpcResponse {
    /// Create a successful response
    pub fn success(protocol_version: i32, request_id: String, payload: serde_json::Value) -> Self {
        Self {
            protocol_version,
            request_id,
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(protocol_version: i32, request_id: String, error: RpcErrorPayload) -> Self {
        Self {
            protocol_version,
            request_id,
            ok: false,
            payload: None,
            error: Some(error),
        }
    }
}

/// Error payload structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorPayload {
    /// Error code from the registry
    pub code: String,

    /// Human-readable, single-line error message
    pub message: String,

    /// Optional machine-readable details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,
}

impl RpcErrorPayload {
    /// Create a new error payload
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Add machine-readable data to the error
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.get_or_insert_with(HashMap::new).insert(key.into(), value);
        self
    }

    /// Look up a string field in the error data
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.as_ref()?.get(key)?.as_str()
    }
}
