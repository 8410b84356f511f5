//! Command Client
//!
//! The submission channel: negotiates the protocol, submits requests and
//! returns handles, and exposes the per-handle operations (status,
//! response, cancel, close) the callback loop is built on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::protocol::ops::{CancelResponse, CloseResponse, ProbeResponse, SubmitRequest, SubmitResponse};
use crate::protocol::{
    ErrorCode, Operation, Request, RequestError, Response, RpcErrorPayload, RpcRequest, Status,
    ALL_GROUPS, GROUP_CONTEXT_KEY, PROTOCOL_MAX, PROTOCOL_MIN,
};

use super::handle::Handle;
use super::transport::{Transport, TransportError};

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Server incompatible: {0}")]
    Incompatible(String),

    #[error("Version negotiation failed: client [{client_min},{client_max}] vs server [{server_min},{server_max}]")]
    VersionNegotiationFailed {
        client_min: i32,
        client_max: i32,
        server_min: i32,
        server_max: i32,
    },

    #[error("Malformed request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Submission rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Handle {handle} is closed")]
    HandleClosed { handle: String },

    #[error("Handle {handle} not found")]
    HandleNotFound { handle: String },

    #[error("Handle {handle} has not finished")]
    NotFinished { handle: String },
}

/// Failure kind for exit code mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport/connection failures (exit code 20)
    Transport = 20,
    /// Request refused at submission (exit code 30)
    Rejected = 30,
    /// Command reported failure (exit code 40)
    Failed = 40,
    /// Callback budget exhausted (exit code 50)
    Timeout = 50,
    /// Outcome contradicted the expectation (exit code 60)
    Mismatch = 60,
    /// Handle closed or command cancelled mid-flight (exit code 80)
    Cancelled = 80,
    /// Server speaks an incompatible protocol (exit code 91)
    Incompatible = 91,
}

impl FailureKind {
    pub fn exit_code(self) -> i32 {
        self as i32
    }
}

impl ClientError {
    /// Map error to failure kind for exit code
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::Transport(_) => FailureKind::Transport,
            ClientError::Protocol(_) => FailureKind::Transport,
            ClientError::Incompatible(_) => FailureKind::Incompatible,
            ClientError::VersionNegotiationFailed { .. } => FailureKind::Incompatible,
            ClientError::InvalidRequest(_) => FailureKind::Rejected,
            ClientError::Rejected { .. } => FailureKind::Rejected,
            ClientError::HandleClosed { .. } => FailureKind::Cancelled,
            ClientError::HandleNotFound { .. } => FailureKind::Transport,
            ClientError::NotFinished { .. } => FailureKind::Transport,
        }
    }

    /// Get exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code()
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Call-context overrides sent alongside a submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext(BTreeMap<String, String>);

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Act under `group_id` instead of the session's default group.
    pub fn group(group_id: i64) -> Self {
        Self::new().with(GROUP_CONTEXT_KEY, group_id.to_string())
    }

    /// Act across every group the caller belongs to.
    pub fn all_groups() -> Self {
        Self::group(ALL_GROUPS)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

/// Command client
pub struct CmdClient {
    transport: Arc<dyn Transport>,
    /// Session key sent with every submission
    session: Option<String>,
    /// Negotiated protocol version (set after probe)
    negotiated_version: Option<i32>,
    /// Client supported protocol range
    client_protocol_min: i32,
    client_protocol_max: i32,
    /// Request ID counter
    request_counter: AtomicU64,
}

impl CmdClient {
    /// Create a new client over the given transport
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session: None,
            negotiated_version: None,
            client_protocol_min: PROTOCOL_MIN,
            client_protocol_max: PROTOCOL_MAX,
            request_counter: AtomicU64::new(0),
        }
    }

    /// Attach a session key to every submission
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn negotiated_version(&self) -> Option<i32> {
        self.negotiated_version
    }

    /// Generate a unique request ID
    fn next_request_id(&self) -> String {
        let counter = self.request_counter.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        format!("req-{:x}-{:08x}", timestamp, counter)
    }

    /// Get the negotiated protocol version, or fail if not negotiated yet
    fn protocol_version(&self) -> ClientResult<i32> {
        self.negotiated_version.ok_or_else(|| {
            ClientError::Protocol("Protocol version not negotiated - call probe() first".to_string())
        })
    }

    /// Parse an error response into a ClientError
    fn parse_error(&self, error: &RpcErrorPayload, handle: &str) -> ClientError {
        match ErrorCode::parse(&error.code) {
            Some(ErrorCode::UnsupportedProtocol) | Some(ErrorCode::UnknownOperation) => {
                ClientError::Incompatible(error.message.clone())
            }
            Some(ErrorCode::InvalidRequest) | Some(ErrorCode::SecurityViolation) => {
                ClientError::Rejected {
                    code: error.code.clone(),
                    message: error.message.clone(),
                }
            }
            Some(ErrorCode::HandleClosed) => ClientError::HandleClosed {
                handle: handle.to_string(),
            },
            Some(ErrorCode::HandleNotFound) => ClientError::HandleNotFound {
                handle: handle.to_string(),
            },
            Some(ErrorCode::NotFinished) => ClientError::NotFinished {
                handle: handle.to_string(),
            },
            Some(ErrorCode::InternalError) | None => {
                ClientError::Protocol(format!("{}: {}", error.code, error.message))
            }
        }
    }

    /// Send one envelope and return the success payload
    fn call(&self, op: Operation, protocol_version: i32, payload: Value, context: &str) -> ClientResult<Value> {
        let request = RpcRequest {
            protocol_version,
            op,
            request_id: self.next_request_id(),
            payload,
        };

        let response = self.transport.execute(&request)?;

        if !response.ok {
            let error = response.error.unwrap_or_else(|| {
                RpcErrorPayload::new("UNKNOWN", format!("{} failed with no error details", op.as_str()))
            });
            return Err(self.parse_error(&error, context));
        }

        response.payload.ok_or_else(|| {
            ClientError::Protocol(format!("{} response missing payload", op.as_str()))
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(op: Operation, payload: Value) -> ClientResult<T> {
        serde_json::from_value(payload).map_err(|e| {
            ClientError::Protocol(format!("{} response malformed: {}", op.as_str(), e))
        })
    }

    /// Reject calls on a handle the caller already closed
    fn ensure_open(handle: &Handle) -> ClientResult<()> {
        if handle.is_closed() {
            return Err(ClientError::HandleClosed {
                handle: handle.id().to_string(),
            });
        }
        Ok(())
    }

    // === Public operations ===

    /// Probe the server and negotiate a protocol version
    ///
    /// This must be called before any other operation.
    pub fn probe(&mut self) -> ClientResult<ProbeResponse> {
        let payload = self.call(Operation::Probe, 0, json!({}), "probe")?;
        let probe: ProbeResponse = Self::decode(Operation::Probe, payload)?;

        // Negotiate version: use max of intersection
        let intersection_min = self.client_protocol_min.max(probe.protocol_min);
        let intersection_max = self.client_protocol_max.min(probe.protocol_max);

        if intersection_min > intersection_max {
            return Err(ClientError::VersionNegotiationFailed {
                client_min: self.client_protocol_min,
                client_max: self.client_protocol_max,
                server_min: probe.protocol_min,
                server_max: probe.protocol_max,
            });
        }

        self.negotiated_version = Some(intersection_max);
        debug!(version = intersection_max, server = %probe.server_version, "negotiated protocol");
        Ok(probe)
    }

    /// Submit a request for asynchronous execution
    ///
    /// Returns as soon as the server accepts the work. Malformed or
    /// unauthorized requests fail here; every other failure is reported
    /// through the terminal response. Never retried.
    pub fn submit(&self, request: &Request, context: &CallContext) -> ClientResult<Handle> {
        let version = self.protocol_version()?;
        request.validate()?;

        let payload = serde_json::to_value(SubmitRequest {
            session: self.session.clone(),
            request: request.clone(),
            context: context.as_map().clone(),
        })
        .map_err(TransportError::from)?;

        let payload = self.call(Operation::Submit, version, payload, request.kind())?;
        let accepted: SubmitResponse = Self::decode(Operation::Submit, payload)?;

        info!(
            handle = %accepted.handle,
            kind = request.kind(),
            steps = accepted.total,
            "command submitted"
        );
        Ok(Handle::new(accepted.handle, accepted.total, request.kind()))
    }

    /// Fetch a fresh status snapshot
    pub fn status(&self, handle: &Handle) -> ClientResult<Status> {
        Self::ensure_open(handle)?;
        let version = self.protocol_version()?;
        let payload = self.call(Operation::Status, version, json!({"handle": handle.id()}), handle.id())?;
        Self::decode(Operation::Status, payload)
    }

    /// Fetch the terminal response
    pub fn response(&self, handle: &Handle) -> ClientResult<Response> {
        Self::ensure_open(handle)?;
        let version = self.protocol_version()?;
        let payload = self.call(Operation::Response, version, json!({"handle": handle.id()}), handle.id())?;
        Self::decode(Operation::Response, payload)
    }

    /// Request cancellation; returns false if the command had already stopped
    pub fn cancel(&self, handle: &Handle) -> ClientResult<bool> {
        Self::ensure_open(handle)?;
        let version = self.protocol_version()?;
        let payload = self.call(Operation::Cancel, version, json!({"handle": handle.id()}), handle.id())?;
        let cancel: CancelResponse = Self::decode(Operation::Cancel, payload)?;
        Ok(cancel.cancelled)
    }

    /// Release the server-side resources behind a handle
    ///
    /// Idempotent: only the first call reaches the server. A handle is
    /// considered closed even when that call fails.
    pub fn close(&self, handle: &Handle) -> ClientResult<()> {
        if !handle.mark_closed() {
            return Ok(());
        }
        let version = self.protocol_version()?;
        match self.call(Operation::Close, version, json!({"handle": handle.id()}), handle.id()) {
            Ok(payload) => {
                let close: CloseResponse = Self::decode(Operation::Close, payload)?;
                debug!(handle = %close.handle, closed = close.closed, "handle closed");
                Ok(())
            }
            // The server already forgot it; nothing left to release
            Err(ClientError::HandleClosed { .. }) | Err(ClientError::HandleNotFound { .. }) => Ok(()),
            Err(e) => {
                warn!(handle = %handle.id(), error = %e, "failed to close handle");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::transport::MockTransport;
    use crate::mock::MockServer;

    fn create_client() -> (MockServer, CmdClient) {
        let server = MockServer::new();
        let session = server.root_session();
        let client = CmdClient::new(Arc::new(MockTransport::with_server(server.clone())))
            .with_session(session);
        (server, client)
    }

    #[test]
    fn test_probe_and_negotiate() {
        let (_, mut client) = create_client();
        let probe = client.probe().unwrap();
        assert_eq!(probe.protocol_min, PROTOCOL_MIN);
        assert_eq!(client.negotiated_version(), Some(PROTOCOL_MAX));
    }

    #[test]
    fn test_submit_requires_probe_first() {
        let (_, client) = create_client();
        let result = client.submit(&Request::delete("Image", [1]), &CallContext::new());
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[test]
    fn test_malformed_request_never_reaches_server() {
        let (server, mut client) = create_client();
        client.probe().unwrap();
        let before = server.request_count();

        let result = client.submit(&Request::do_all(vec![]), &CallContext::new());
        assert!(matches!(result, Err(ClientError::InvalidRequest(_))));
        assert_eq!(server.request_count(), before);
    }

    #[test]
    fn test_unknown_session_is_rejected() {
        let server = MockServer::new();
        let mut client = CmdClient::new(Arc::new(MockTransport::with_server(server)))
            .with_session("no-such-session");
        client.probe().unwrap();

        let err = client
            .submit(&Request::delete("Image", [1]), &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected { ref code, .. } if code == "SECURITY_VIOLATION"));
        assert_eq!(err.failure_kind(), FailureKind::Rejected);
    }

    #[test]
    fn test_closed_handle_is_not_polled() {
        let (server, mut client) = create_client();
        client.probe().unwrap();
        let image = server.add_object("Image", server.root_user(), server.root_group());

        let handle = client
            .submit(&Request::find_parents("Image", [image], &["Project"]), &CallContext::new())
            .unwrap();
        client.close(&handle).unwrap();

        let before = server.request_count();
        assert!(matches!(client.status(&handle), Err(ClientError::HandleClosed { .. })));
        assert_eq!(server.request_count(), before);
    }

    #[test]
    fn test_close_twice_sends_once() {
        let (server, mut client) = create_client();
        client.probe().unwrap();
        let image = server.add_object("Image", server.root_user(), server.root_group());

        let handle = client
            .submit(&Request::delete("Image", [image]), &CallContext::new())
            .unwrap();
        client.close(&handle).unwrap();
        let after_first = server.request_count();
        client.close(&handle).unwrap();
        assert_eq!(server.request_count(), after_first);
    }

    #[test]
    fn test_call_context_group() {
        let context = CallContext::group(7);
        assert_eq!(context.get(GROUP_CONTEXT_KEY), Some("7"));
        assert_eq!(CallContext::all_groups().get(GROUP_CONTEXT_KEY), Some("-1"));
    }

    #[test]
    fn test_error_mapping() {
        let err = ClientError::HandleClosed { handle: "h".to_string() };
        assert_eq!(err.failure_kind(), FailureKind::Cancelled);
        assert_eq!(err.exit_code(), 80);

        let err = ClientError::Incompatible("v9".to_string());
        assert_eq!(err.exit_code(), 91);
    }

    #[test]
    fn test_request_id_generation() {
        let (_, client) = create_client();
        let id1 = client.next_request_id();
        let id2 = client.next_request_id();
        assert_ne!(id1, id2);
        assert!(id1.starts_with("req-"));
    }
}
