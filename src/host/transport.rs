//! Transport Layer for the command client
//!
//! Abstracts the connection to the command service for testability:
//! - Transport trait: one request in, one response out
//! - MockTransport: in-process mock server for tests
//! - CommandTransport: spawns a program (usually `ssh`) per request

use std::io;
use std::process::{Command, Stdio};

use tracing::debug;

use crate::mock::MockServer;
use crate::protocol::{RpcRequest, RpcResponse};

/// Transport trait for RPC communication
pub trait Transport: Send + Sync {
    /// Execute an RPC request and return the response
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError>;
}

/// Transport errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Command error: {0}")]
    Command(String),
}

/// Mock transport for testing - talks to a MockServer in-process
pub struct MockTransport {
    server: MockServer,
}

impl MockTransport {
    /// Create a new mock transport with a fresh mock server
    pub fn new() -> Self {
        Self {
            server: MockServer::new(),
        }
    }

    /// Create a mock transport over a pre-configured server
    ///
    /// The server shares its state with clones, so tests can keep a copy
    /// for setup and assertions.
    pub fn with_server(server: MockServer) -> Self {
        Self { server }
    }

    /// Get a reference to the underlying mock server for test configuration
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockTransport {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        Ok(self.server.handle_request(request))
    }
}

/// Command transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConfig {
    /// Program to spawn for every request
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
}

impl CommandConfig {
    /// Run `remote_command` on `host` through ssh in batch mode.
    pub fn ssh(
        host: &str,
        user: &str,
        port: u16,
        key_path: Option<&str>,
        connect_timeout_seconds: u32,
        remote_command: &[&str],
    ) -> Self {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout_seconds),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-p".to_string(),
            port.to_string(),
        ];

        if let Some(key_path) = key_path {
            args.push("-i".to_string());
            args.push(key_path.to_string());
        }

        args.push(format!("{}@{}", user, host));
        args.extend(remote_command.iter().map(|s| s.to_string()));

        Self {
            program: "ssh".to_string(),
            args,
        }
    }
}

/// Transport that spawns a program per request
///
/// Format: single JSON request line on stdin → single JSON response on stdout.
pub struct CommandTransport {
    config: CommandConfig,
}

impl CommandTransport {
    /// Create a new command transport with the given configuration
    pub fn new(config: CommandConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CommandConfig {
        &self.config
    }
}

impl Transport for CommandTransport {
    fn execute(&self, request: &RpcRequest) -> Result<RpcResponse, TransportError> {
        let request_json = serde_json::to_string(request)?;
        debug!(
            program = %self.config.program,
            op = request.op.as_str(),
            request_id = %request.request_id,
            "spawning transport command"
        );

        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                TransportError::ConnectionFailed(format!(
                    "failed to spawn {}: {}",
                    self.config.program, e
                ))
            })?;

        // Write request to stdin; dropping the handle closes the pipe
        if let Some(mut stdin) = child.stdin.take() {
            use std::io::Write;
            if let Err(e) = writeln!(stdin, "{}", request_json) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
        }

        let output = child
            .wait_with_output()
            .map_err(|e| TransportError::Command(format!("process error: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Command(format!(
                "{} exited with {}: {}",
                self.config.program,
                output.status,
                stderr.trim()
            )));
        }

        let response: RpcResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| TransportError::Protocol(format!("Invalid response JSON: {}", e)))?;

        if response.request_id != request.request_id {
            return Err(TransportError::Protocol(format!(
                "response for {} does not match request {}",
                response.request_id, request.request_id
            )));
        }

        Ok(response)
    }
}
