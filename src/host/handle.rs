//! Handles to in-flight commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use super::client::{ClientResult, CmdClient};

#[derive(Debug)]
struct HandleInner {
    id: String,
    total: u32,
    kind: &'static str,
    closed: AtomicBool,
}

/// Opaque reference to one in-flight command.
///
/// Clones share the closed flag, so a close issued through any clone is
/// seen by a callback loop polling through another.
#[derive(Debug, Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    pub(crate) fn new(id: String, total: u32, kind: &'static str) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                total,
                kind,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Re-attach to a handle id obtained elsewhere (e.g. printed by an earlier run).
    pub fn attach(id: impl Into<String>) -> Self {
        Self::new(id.into(), 0, "attached")
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Steps the server announced at submission (0 when re-attached).
    pub fn total_steps(&self) -> u32 {
        self.inner.total
    }

    /// Request kind this handle was issued for.
    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Flip the closed flag; true only for the call that closed it.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.inner.closed.swap(true, Ordering::SeqCst)
    }
}

/// Owns a handle and closes it when dropped.
///
/// Closing is mandatory on every path out of an operation; the guard makes
/// early returns and panics close too.
pub struct HandleGuard<'c> {
    client: &'c CmdClient,
    handle: Handle,
}

impl<'c> HandleGuard<'c> {
    pub fn new(client: &'c CmdClient, handle: Handle) -> Self {
        Self { client, handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Close now and surface the error, instead of logging it on drop.
    pub fn close(self) -> ClientResult<()> {
        self.client.close(&self.handle)
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        if self.handle.is_closed() {
            return;
        }
        if let Err(e) = self.client.close(&self.handle) {
            warn!(handle = %self.handle.id(), error = %e, "close on drop failed");
        }
    }
}
