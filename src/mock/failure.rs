//! Failure Injection for the Mock Server
//!
//! Makes chosen envelope operations fail (or stall) so error paths on the
//! client can be exercised without a misbehaving real server.

use std::collections::HashMap;
use std::time::Duration;

use crate::protocol::{ErrorCode, Operation};

/// Failure configuration for an operation
#[derive(Debug, Clone, Default)]
pub struct FailureConfig {
    /// Error code to return (if any)
    pub error_code: Option<String>,
    /// Error message to return
    pub error_message: Option<String>,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Return an envelope error with this code
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Fail as if the server crashed mid-call
    pub fn internal(message: impl Into<String>) -> Self {
        Self::error(ErrorCode::InternalError.as_str(), message)
    }

    /// Respond normally, but late
    pub fn delay(duration: Duration) -> Self {
        Self {
            delay: Some(duration),
            ..Self::default()
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Per-operation failure injection
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<Operation, FailureConfig>,
    /// Calls seen per operation, for fail_count tracking
    call_counts: HashMap<Operation, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, op: Operation, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    pub fn inject_error(&mut self, op: Operation, code: impl Into<String>, message: impl Into<String>) {
        self.inject(op, FailureConfig::error(code, message));
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_op(&mut self, op: Operation) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// The failure to apply to this call of `op`, if any
    pub fn check(&mut self, op: Operation) -> Option<FailureConfig> {
        let config = self.configs.get(&op)?;
        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;

        match config.fail_count {
            Some(limit) if *count > limit => None,
            _ => Some(config.clone()),
        }
    }
}
