//! omecmd - asynchronous command client
//!
//! Submits graph-mutating commands (delete, chgrp, chown, find, raw
//! repository access, batches) to a command service, follows them through a
//! handle until they finish, classifies the outcome and closes the handle.
//! Ships an in-process mock service for tests and `--mock` runs.

pub mod callback;
pub mod classify;
pub mod config;
pub mod context;
pub mod host;
pub mod links;
pub mod logging;
pub mod mock;
pub mod signal;

pub use omecmd_protocol as protocol;

pub use callback::{submit_and_wait, BackoffPolicy, CallbackConfig, CallbackError, CmdCallback, Completion, StepEvent};
pub use classify::{classify, expect_positional, ClassifyError, Outcome};
pub use config::{ClientSettings, EffectiveConfig};
pub use context::{ContextError, RunContext};
pub use host::{CallContext, ClientError, CmdClient, FailureKind, Handle, HandleGuard};
pub use protocol::{ErrorInfo, IdMap, Request, Response, Status};
