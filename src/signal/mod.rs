//! Signal handling for interrupted waits (SIGINT)
//!
//! On the first Ctrl-C every in-flight handle registered here is closed
//! through its client, which makes a blocked callback loop return
//! `CallbackError::Closed` at its next iteration. A second Ctrl-C exits
//! immediately with code 80 (CANCELLED).

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::host::{CmdClient, Handle};

/// Exit code for cancelled runs
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Signal handler state
#[derive(Default)]
pub struct SignalState {
    /// First signal received (handles closed)
    cancel_requested: AtomicBool,
    /// Second signal received (immediate exit requested)
    immediate_exit: AtomicBool,
    signal_count: AtomicU8,
    /// Client the in-flight handles belong to
    client: Mutex<Option<Arc<CmdClient>>>,
    /// Handles to close on interrupt
    in_flight: Mutex<Vec<Handle>>,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    pub fn is_immediate_exit(&self) -> bool {
        self.immediate_exit.load(Ordering::SeqCst)
    }

    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Record a signal and return what to do about it
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        if count == 0 {
            self.cancel_requested.store(true, Ordering::SeqCst);
            SignalAction::CloseHandles
        } else if count == 1 {
            self.immediate_exit.store(true, Ordering::SeqCst);
            SignalAction::ImmediateExit
        } else {
            SignalAction::Ignore
        }
    }

    /// Set the client used to close registered handles
    pub fn set_client(&self, client: Arc<CmdClient>) {
        if let Ok(mut slot) = self.client.lock() {
            *slot = Some(client);
        }
    }

    /// Register a handle to close on interrupt
    pub fn register(&self, handle: &Handle) {
        if let Ok(mut handles) = self.in_flight.lock() {
            handles.push(handle.clone());
        }
    }

    /// Forget a handle that was closed normally
    pub fn unregister(&self, handle: &Handle) {
        if let Ok(mut handles) = self.in_flight.lock() {
            handles.retain(|h| h.id() != handle.id());
        }
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.in_flight
            .lock()
            .map(|handles| handles.iter().map(|h| h.id().to_string()).collect())
            .unwrap_or_default()
    }

    /// Close every registered handle; returns how many were closed
    pub fn close_in_flight(&self) -> usize {
        let client = match self.client.lock() {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        let handles = match self.in_flight.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };
        let Some(client) = client else {
            return 0;
        };

        let mut closed = 0;
        for handle in &handles {
            match client.close(handle) {
                Ok(()) => closed += 1,
                Err(e) => warn!(handle = %handle.id(), error = %e, "interrupt close failed"),
            }
        }
        closed
    }

    /// Reset the signal state (for testing)
    pub fn reset(&self) {
        self.cancel_requested.store(false, Ordering::SeqCst);
        self.immediate_exit.store(false, Ordering::SeqCst);
        self.signal_count.store(0, Ordering::SeqCst);
        if let Ok(mut handles) = self.in_flight.lock() {
            handles.clear();
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: close in-flight handles
    CloseHandles,
    /// Second signal: exit immediately
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the Ctrl-C handler over a shared [`SignalState`]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SignalState::new()),
        }
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler; must be called once at program startup
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::CloseHandles => {
                eprintln!("\nInterrupted, closing in-flight handles...");
                state.close_in_flight();
            }
            SignalAction::ImmediateExit => {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{CallContext, MockTransport};
    use crate::mock::MockServer;
    use crate::protocol::Request;

    #[test]
    fn test_signal_state_initial() {
        let state = SignalState::new();
        assert!(!state.is_cancel_requested());
        assert!(!state.is_immediate_exit());
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_signal_sequence() {
        let state = SignalState::new();
        assert_eq!(state.handle_signal(), SignalAction::CloseHandles);
        assert!(state.is_cancel_requested());
        assert_eq!(state.handle_signal(), SignalAction::ImmediateExit);
        assert!(state.is_immediate_exit());
        assert_eq!(state.handle_signal(), SignalAction::Ignore);
        assert_eq!(state.signal_count(), 3);

        state.reset();
        assert_eq!(state.signal_count(), 0);
    }

    #[test]
    fn test_close_in_flight_closes_registered_handles() {
        let server = MockServer::new();
        let mut client = CmdClient::new(Arc::new(MockTransport::with_server(server.clone())))
            .with_session(server.root_session());
        client.probe().unwrap();
        let client = Arc::new(client);

        let image = server.add_object("Image", server.root_user(), server.root_group());
        let handle = client
            .submit(&Request::delete("Image", [image]), &CallContext::new())
            .unwrap();

        let state = SignalState::new();
        state.set_client(Arc::clone(&client));
        state.register(&handle);
        assert_eq!(state.in_flight(), vec![handle.id().to_string()]);

        assert_eq!(state.close_in_flight(), 1);
        assert!(handle.is_closed());
        assert!(server.open_handles().is_empty());
        assert!(state.in_flight().is_empty());
    }

    #[test]
    fn test_close_without_client_is_noop() {
        let state = SignalState::new();
        state.register(&Handle::attach("h-1"));
        assert_eq!(state.close_in_flight(), 0);
    }
}
