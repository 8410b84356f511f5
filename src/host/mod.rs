//! Client-Side Components
//!
//! Transport, submission channel and handles for talking to the command
//! service.

pub mod client;
pub mod handle;
pub mod transport;

pub use client::{CallContext, ClientError, ClientResult, CmdClient, FailureKind};
pub use handle::{Handle, HandleGuard};
pub use transport::{CommandConfig, CommandTransport, MockTransport, Transport, TransportError};
