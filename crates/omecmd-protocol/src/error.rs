//! Error types for the RPC protocol.
//!
//! These are envelope-level errors: the call itself was refused. A command
//! that was accepted and later failed reports through its terminal
//! [`Response`](crate::Response) instead.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::envelope::RpcErrorPayload;

/// Error codes returned in RPC error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed JSON, missing required fields, or invalid field values.
    InvalidRequest,
    /// Protocol version is outside the supported range.
    UnsupportedProtocol,
    /// Unknown operation requested.
    UnknownOperation,
    /// Caller is not authenticated or may not act in the requested scope.
    SecurityViolation,
    /// The handle was never issued by this server.
    HandleNotFound,
    /// The handle has already been closed.
    HandleClosed,
    /// A response was requested before the command stopped running.
    NotFinished,
    /// Server-side fault unrelated to the request.
    InternalError,
}

impl ErrorCode {
    /// Wire representation of the code
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::UnsupportedProtocol => "UNSUPPORTED_PROTOCOL",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::HandleNotFound => "HANDLE_NOT_FOUND",
            Self::HandleClosed => "HANDLE_CLOSED",
            Self::NotFinished => "NOT_FINISHED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Parse a wire code; unknown codes yield `None`
    pub fn parse(code: &str) -> Option<Self> {
        let code = match code {
            "INVALID_REQUEST" => Self::InvalidRequest,
            "UNSUPPORTED_PROTOCOL" => Self::UnsupportedProtocol,
            "UNKNOWN_OPERATION" => Self::UnknownOperation,
            "SECURITY_VIOLATION" => Self::SecurityViolation,
            "HANDLE_NOT_FOUND" => Self::HandleNotFound,
            "HANDLE_CLOSED" => Self::HandleClosed,
            "NOT_FINISHED" => Self::NotFinished,
            "INTERNAL_ERROR" => Self::InternalError,
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RPC error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code from the registry.
    pub code: ErrorCode,
    /// Human-readable, single-line error message.
    pub message: String,
    /// Optional machine-readable details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RpcError {
    /// Create a new RPC error.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Create a new RPC error with additional data.
    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Create an INVALID_REQUEST error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Create an UNSUPPORTED_PROTOCOL error.
    pub fn unsupported_protocol(version: i32, min: i32, max: i32) -> Self {
        Self::with_data(
            ErrorCode::UnsupportedProtocol,
            format!("protocol_version {} is outside supported range [{}, {}]", version, min, max),
            serde_json::json!({
                "requested": version,
                "min": min,
                "max": max
            }),
        )
    }

    /// Create an UNKNOWN_OPERATION error.
    pub fn unknown_operation(op: &str) -> Self {
        Self::with_data(
            ErrorCode::UnknownOperation,
            format!("unknown operation: {}", op),
            serde_json::json!({ "op": op }),
        )
    }

    /// Create a SECURITY_VIOLATION error.
    pub fn security_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SecurityViolation, message)
    }

    /// Create a HANDLE_NOT_FOUND error.
    pub fn handle_not_found(handle: &str) -> Self {
        Self::with_data(
            ErrorCode::HandleNotFound,
            format!("handle '{}' not found", handle),
            serde_json::json!({ "handle": handle }),
        )
    }

    /// Create a HANDLE_CLOSED error.
    pub fn handle_closed(handle: &str) -> Self {
        Self::with_data(
            ErrorCode::HandleClosed,
            format!("handle '{}' has been closed", handle),
            serde_json::json!({ "handle": handle }),
        )
    }

    /// Create a NOT_FINISHED error.
    pub fn not_finished(handle: &str) -> Self {
        Self::with_data(
            ErrorCode::NotFinished,
            format!("command behind handle '{}' is still running", handle),
            serde_json::json!({ "handle": handle }),
        )
    }

    /// Convert into the envelope's string-coded payload.
    pub fn into_payload(self) -> RpcErrorPayload {
        let mut payload = RpcErrorPayload::new(self.code.as_str(), self.message);
        if let Some(serde_json::Value::Object(map)) = self.data {
            for (key, value) in map {
                payload = payload.with_data(key, value);
            }
        }
        payload
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}
