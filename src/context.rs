//! Per-run context
//!
//! Everything a run shares across commands: the connected client, the
//! probe result, the timeout scaling factor derived from it, and the
//! handles opened so far. Built once by [`RunContext::setup`] and passed
//! explicitly; teardown closes whatever is still open.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::callback::{CallbackConfig, CallbackError, CmdCallback, StepEvent};
use crate::classify::{classify, ClassifyError, Outcome};
use crate::config::ClientSettings;
use crate::host::{CallContext, ClientError, CmdClient, FailureKind, Handle};
use crate::protocol::ops::ProbeResponse;
use crate::protocol::Request;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

impl ContextError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ContextError::Client(e) => e.failure_kind(),
            ContextError::Callback(e) => e.failure_kind(),
            ContextError::Classify(e) => e.failure_kind(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.failure_kind().exit_code()
    }
}

pub struct RunContext {
    client: Arc<CmdClient>,
    probe: ProbeResponse,
    callback: CallbackConfig,
    scaling_ms: u64,
    default_context: CallContext,
    tracked: Vec<Handle>,
    torn_down: bool,
}

impl RunContext {
    /// Probe the server and fix the scaling factor for the whole run
    ///
    /// The factor is the larger of the configured per-loop cap and the
    /// server's own backoff estimate (`count × ms`).
    pub fn setup(mut client: CmdClient, settings: &ClientSettings) -> Result<Self, ContextError> {
        let probe = client.probe()?;
        let scaling_ms = settings.callback.ms_per_loop.max(probe.backoff.expected_ms());
        debug!(
            scaling_ms,
            backoff_count = probe.backoff.count,
            backoff_ms = probe.backoff.ms,
            "run context ready"
        );

        let default_context = match settings.session_group {
            Some(group) => CallContext::group(group),
            None => CallContext::new(),
        };

        Ok(Self {
            client: Arc::new(client),
            probe,
            callback: settings.callback.scaled(scaling_ms),
            scaling_ms,
            default_context,
            tracked: Vec::new(),
            torn_down: false,
        })
    }

    pub fn client(&self) -> &CmdClient {
        &self.client
    }

    /// Shared client, for closing handles from another thread
    pub fn shared_client(&self) -> Arc<CmdClient> {
        Arc::clone(&self.client)
    }

    pub fn probe(&self) -> &ProbeResponse {
        &self.probe
    }

    pub fn scaling_ms(&self) -> u64 {
        self.scaling_ms
    }

    /// Callback configuration with the run's scaling applied
    pub fn callback_config(&self) -> CallbackConfig {
        self.callback
    }

    /// Call context used when a command does not bring its own
    pub fn default_context(&self) -> &CallContext {
        &self.default_context
    }

    /// Close `handle` at teardown if nobody did before
    pub fn track(&mut self, handle: &Handle) {
        self.tracked.push(handle.clone());
    }

    pub fn tracked(&self) -> &[Handle] {
        &self.tracked
    }

    /// Submit and track
    pub fn submit(&mut self, request: &Request, context: &CallContext) -> Result<Handle, ContextError> {
        let handle = self.client.submit(request, context)?;
        self.track(&handle);
        Ok(handle)
    }

    /// Poll loop for `handle` using the scaled configuration
    pub fn callback(&self, handle: &Handle) -> CmdCallback<'_> {
        CmdCallback::new(&self.client, handle, self.callback)
    }

    /// Submit, wait, classify; the handle is closed on every path
    pub fn do_change(
        &mut self,
        request: &Request,
        should_succeed: bool,
        context: &CallContext,
    ) -> Result<Outcome, ContextError> {
        self.do_change_with_steps(request, should_succeed, context, |_| {})
    }

    /// [`do_change`](Self::do_change) with a step handler on the poll loop
    pub fn do_change_with_steps<F>(
        &mut self,
        request: &Request,
        should_succeed: bool,
        context: &CallContext,
        on_step: F,
    ) -> Result<Outcome, ContextError>
    where
        F: FnMut(StepEvent),
    {
        let handle = self.submit(request, context)?;
        let waited = self.callback(&handle).on_step(on_step).block();
        let closed = self.client.close(&handle);

        let completion = waited?;
        closed?;
        Ok(classify(&completion, should_succeed)?)
    }

    /// Close every tracked handle still open
    ///
    /// Keeps going past failures and returns the first one.
    pub fn teardown(&mut self) -> Result<(), ContextError> {
        self.torn_down = true;
        let mut first_error = None;
        for handle in self.tracked.drain(..) {
            if handle.is_closed() {
                continue;
            }
            if let Err(e) = self.client.close(&handle) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

impl Drop for RunContext {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(e) = self.teardown() {
            warn!(error = %e, "teardown on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockTransport;
    use crate::mock::MockServer;

    fn settings(ms_per_loop: u64) -> ClientSettings {
        let mut settings = ClientSettings::default();
        settings.callback = CallbackConfig {
            loops: 10,
            ms_per_loop,
            initial_interval_ms: 1,
            backoff: crate::callback::BackoffPolicy::Exponential,
        };
        settings
    }

    fn client(server: &MockServer) -> CmdClient {
        CmdClient::new(Arc::new(MockTransport::with_server(server.clone()))).with_session(server.root_session())
    }

    #[test]
    fn test_scaling_uses_configured_floor() {
        let server = MockServer::new();
        server.backoff(2, 1);
        let ctx = RunContext::setup(client(&server), &settings(5)).unwrap();
        assert_eq!(ctx.scaling_ms(), 5);
    }

    #[test]
    fn test_scaling_follows_server_backoff() {
        let server = MockServer::new();
        server.backoff(4, 3);
        let ctx = RunContext::setup(client(&server), &settings(5)).unwrap();
        assert_eq!(ctx.scaling_ms(), 12);
        assert_eq!(ctx.callback_config().ms_per_loop, 12);
        assert_eq!(ctx.callback_config().loops, 10);
    }

    #[test]
    fn test_session_group_becomes_default_context() {
        let server = MockServer::new();
        let mut settings = settings(2);
        settings.session_group = Some(-1);
        let ctx = RunContext::setup(client(&server), &settings).unwrap();
        assert_eq!(ctx.default_context(), &CallContext::all_groups());
    }

    #[test]
    fn test_teardown_closes_tracked_handles() {
        let server = MockServer::new();
        let image = server.add_object("Image", server.root_user(), server.root_group());
        let mut ctx = RunContext::setup(client(&server), &settings(2)).unwrap();

        let handle = ctx
            .submit(&Request::delete("Image", [image]), &CallContext::new())
            .unwrap();
        assert_eq!(server.open_handles(), vec![handle.id().to_string()]);

        ctx.teardown().unwrap();
        assert!(server.open_handles().is_empty());
        assert!(handle.is_closed());
    }

    #[test]
    fn test_drop_tears_down() {
        let server = MockServer::new();
        let image = server.add_object("Image", server.root_user(), server.root_group());
        {
            let mut ctx = RunContext::setup(client(&server), &settings(2)).unwrap();
            ctx.submit(&Request::delete("Image", [image]), &CallContext::new())
                .unwrap();
        }
        assert!(server.open_handles().is_empty());
    }

    #[test]
    fn test_do_change_closes_on_timeout() {
        let server = MockServer::new();
        let image = server.add_object("Image", server.root_user(), server.root_group());
        server.advance_on_poll(1);
        let mut settings = settings(1);
        settings.callback.loops = 2;
        let mut ctx = RunContext::setup(client(&server), &settings).unwrap();

        // Delete needs three polls; two loops cannot finish it
        let err = ctx
            .do_change(&Request::delete("Image", [image]), true, &CallContext::new())
            .unwrap_err();
        assert!(matches!(err, ContextError::Callback(CallbackError::Timeout { .. })));
        assert_eq!(err.exit_code(), 50);
        assert!(server.open_handles().is_empty());
    }
}
