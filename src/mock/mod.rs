//! Mock Command Server
//!
//! Configurable in-process implementation of the command service, used by
//! tests and by the CLI's `--mock` flag.
//!
//! # Operations
//!
//! - `probe`: protocol range and the configured backoff measurement
//! - `submit`: authenticate the session, resolve the group scope, issue a handle
//! - `status`: advance the execution by the configured steps and report it
//! - `response`: terminal response once the execution has stopped
//! - `cancel`: stop a running execution with CANCELLED|FAILURE
//! - `close`: release the handle; later calls see HANDLE_CLOSED

mod engine;
mod failure;
mod graph;
mod server;
mod state;

pub use failure::{FailureConfig, FailureInjector};
pub use graph::{cascade, is_container_type, Cascade, ObjRef, Ownership, CONTAINMENT};
pub use server::MockServer;
pub use state::{Privilege, User};
