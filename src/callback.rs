//! Callback loop for in-flight commands
//!
//! Polls a handle on a capped schedule until its status turns terminal or
//! the loop budget runs out:
//! - `loops` (N): maximum number of status queries
//! - `ms_per_loop` (S): cap on a single sleep between queries
//! - `initial_interval_ms`: first sleep under exponential backoff
//!
//! The total time spent sleeping is bounded by `N × S`. The loop never
//! closes the handle; whoever submitted owns that, and [`submit_and_wait`]
//! does it on every path.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::host::{CallContext, ClientError, CmdClient, FailureKind, Handle, HandleGuard};
use crate::protocol::{Request, Response, Status};

/// Sleep schedule between status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffPolicy {
    /// Always sleep `ms_per_loop`.
    Fixed,
    /// Double from `initial_interval_ms`, capped at `ms_per_loop`.
    Exponential,
}

impl std::str::FromStr for BackoffPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(BackoffPolicy::Fixed),
            "exponential" => Ok(BackoffPolicy::Exponential),
            other => Err(format!("unknown backoff policy '{}' (expected fixed or exponential)", other)),
        }
    }
}

/// Callback loop configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackConfig {
    /// Maximum status queries (default: 10)
    pub loops: u32,
    /// Maximum sleep per iteration in milliseconds (default: 500)
    pub ms_per_loop: u64,
    /// First sleep under exponential backoff (default: 50)
    pub initial_interval_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            loops: 10,
            ms_per_loop: 500,
            initial_interval_ms: 50,
            backoff: BackoffPolicy::Exponential,
        }
    }
}

impl CallbackConfig {
    pub fn new(loops: u32, ms_per_loop: u64) -> Self {
        Self {
            loops,
            ms_per_loop,
            initial_interval_ms: Self::default().initial_interval_ms.min(ms_per_loop),
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Validate loop bounds
    pub fn validate(&self) -> Result<(), CallbackValidationError> {
        // loops must be in (0, 100000]
        if self.loops == 0 || self.loops > 100_000 {
            return Err(CallbackValidationError::LoopsOutOfBounds { value: self.loops });
        }

        // ms_per_loop must be in (0, 600000]
        if self.ms_per_loop == 0 || self.ms_per_loop > 600_000 {
            return Err(CallbackValidationError::IntervalOutOfBounds {
                value: self.ms_per_loop,
            });
        }

        // initial_interval_ms must be in (0, ms_per_loop]
        if self.initial_interval_ms == 0 || self.initial_interval_ms > self.ms_per_loop {
            return Err(CallbackValidationError::InitialOutOfBounds {
                value: self.initial_interval_ms,
                max: self.ms_per_loop,
            });
        }

        Ok(())
    }

    /// Same loop count with the per-iteration cap replaced by `scaling_ms`
    pub fn scaled(&self, scaling_ms: u64) -> Self {
        let ms_per_loop = scaling_ms.max(1);
        Self {
            ms_per_loop,
            initial_interval_ms: self.initial_interval_ms.min(ms_per_loop),
            ..*self
        }
    }

    /// Sleep after the `iteration`-th query (0-based)
    pub fn interval(&self, iteration: u32) -> Duration {
        let ms = match self.backoff {
            BackoffPolicy::Fixed => self.ms_per_loop,
            BackoffPolicy::Exponential => 1u64
                .checked_shl(iteration)
                .and_then(|factor| self.initial_interval_ms.checked_mul(factor))
                .map_or(self.ms_per_loop, |ms| ms.min(self.ms_per_loop)),
        };
        Duration::from_millis(ms)
    }

    /// Upper bound on the time the loop spends sleeping
    pub fn budget(&self) -> Duration {
        Duration::from_millis(u64::from(self.loops).saturating_mul(self.ms_per_loop))
    }
}

/// Callback configuration errors
#[derive(Debug, thiserror::Error)]
pub enum CallbackValidationError {
    #[error("callback.loops must be in (0, 100000], got {value}")]
    LoopsOutOfBounds { value: u32 },

    #[error("callback.ms_per_loop must be in (0, 600000], got {value}")]
    IntervalOutOfBounds { value: u64 },

    #[error("callback.initial_interval_ms must be in (0, {max}], got {value}")]
    InitialOutOfBounds { value: u64, max: u64 },
}

/// Progress notification passed to the step handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEvent {
    pub step: u32,
    pub total: u32,
}

/// Terminal status plus the response fetched for it
#[derive(Debug, Clone)]
pub struct Completion {
    pub status: Status,
    pub response: Response,
}

/// Callback loop errors
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("Handle {handle} was closed while waiting")]
    Closed { handle: String },

    #[error("Handle {handle} still running after {loops} loops of {ms_per_loop}ms")]
    Timeout {
        handle: String,
        loops: u32,
        ms_per_loop: u64,
        /// Last status seen before giving up
        last_status: Option<Box<Status>>,
    },

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl CallbackError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CallbackError::Closed { .. } => FailureKind::Cancelled,
            CallbackError::Timeout { .. } => FailureKind::Timeout,
            CallbackError::Client(e) => e.failure_kind(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code()
    }

    fn from_client(error: ClientError, handle: &Handle) -> Self {
        match error {
            ClientError::HandleClosed { .. } => CallbackError::Closed {
                handle: handle.id().to_string(),
            },
            other => CallbackError::Client(other),
        }
    }
}

type StepHandler<'c> = Box<dyn FnMut(StepEvent) + 'c>;

/// Poll loop bound to one handle
///
/// The step handler runs once per observed step increase while the command
/// is still running. It runs after the server reported the step, which is
/// the only ordering it can rely on.
pub struct CmdCallback<'c> {
    client: &'c CmdClient,
    handle: Handle,
    config: CallbackConfig,
    on_step: Option<StepHandler<'c>>,
}

impl<'c> CmdCallback<'c> {
    pub fn new(client: &'c CmdClient, handle: &Handle, config: CallbackConfig) -> Self {
        Self {
            client,
            handle: handle.clone(),
            config,
            on_step: None,
        }
    }

    /// Register a closure invoked with `(step, total)` as the server progresses
    pub fn on_step(mut self, handler: impl FnMut(StepEvent) + 'c) -> Self {
        self.on_step = Some(Box::new(handler));
        self
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Block until the command stops, the handle is closed, or the budget runs out
    pub fn block(mut self) -> Result<Completion, CallbackError> {
        let mut last_step = 0;
        let mut last_status: Option<Status> = None;

        for iteration in 0..self.config.loops {
            if self.handle.is_closed() {
                return Err(CallbackError::Closed {
                    handle: self.handle.id().to_string(),
                });
            }

            let status = self
                .client
                .status(&self.handle)
                .map_err(|e| CallbackError::from_client(e, &self.handle))?;
            debug!(
                handle = %self.handle.id(),
                iteration,
                step = status.step,
                total = status.total,
                flags = %status.flags_label(),
                "polled status"
            );

            if status.is_terminal() {
                let response = self
                    .client
                    .response(&self.handle)
                    .map_err(|e| CallbackError::from_client(e, &self.handle))?;
                info!(
                    handle = %self.handle.id(),
                    flags = %status.flags_label(),
                    polls = iteration + 1,
                    "command finished"
                );
                return Ok(Completion { status, response });
            }

            if status.step > last_step {
                last_step = status.step;
                if let Some(handler) = self.on_step.as_mut() {
                    handler(StepEvent {
                        step: status.step,
                        total: status.total,
                    });
                }
            }
            last_status = Some(status);

            if iteration + 1 < self.config.loops {
                std::thread::sleep(self.config.interval(iteration));
            }
        }

        warn!(
            handle = %self.handle.id(),
            loops = self.config.loops,
            ms_per_loop = self.config.ms_per_loop,
            "callback budget exhausted"
        );
        Err(CallbackError::Timeout {
            handle: self.handle.id().to_string(),
            loops: self.config.loops,
            ms_per_loop: self.config.ms_per_loop,
            last_status: last_status.map(Box::new),
        })
    }
}

/// Submit, wait, and close the handle whatever happens
pub fn submit_and_wait(
    client: &CmdClient,
    request: &Request,
    context: &CallContext,
    config: CallbackConfig,
) -> Result<Completion, CallbackError> {
    let handle = client.submit(request, context)?;
    let guard = HandleGuard::new(client, handle);
    let completion = CmdCallback::new(client, guard.handle(), config).block()?;
    guard.close()?;
    Ok(completion)
}
