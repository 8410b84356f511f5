//! Mock Server Implementation
//!
//! In-process stand-in for the command service. Answers every envelope
//! operation, executes requests against a small object graph and lets
//! tests shape timing (held handles, steps per poll) and failures.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::json;

use crate::protocol::ops::{Backoff, HandleRequest, SubmitRequest};
use crate::protocol::{
    ErrorCode, ErrorInfo, Operation, Response, RpcError, RpcErrorPayload, RpcRequest, RpcResponse,
    Status, ALL_GROUPS, GROUP_CONTEXT_KEY, PROTOCOL_MAX, PROTOCOL_MIN,
};

use super::engine;
use super::failure::{FailureConfig, FailureInjector};
use super::graph::{ObjRef, Ownership, StoredLink};
use super::state::{Caller, Execution, Group, GroupScope, MockState, Privilege, User};

const SERVER_VERSION: &str = "omecmd-mock/0.1.0";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Timing knobs
#[derive(Debug, Clone, Copy)]
struct Timing {
    backoff: Backoff,
    steps_per_poll: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            backoff: Backoff { count: 0, ms: 0 },
            steps_per_poll: 1,
        }
    }
}

/// Configurable mock server for testing
///
/// Clones share state, so a test can keep one clone for setup and
/// assertions while a [`MockTransport`](crate::host::MockTransport) drives
/// another.
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
    timing: Arc<Mutex<Timing>>,
    requests: Arc<AtomicU64>,
    root_user: i64,
    root_group: i64,
    root_session: String,
}

impl MockServer {
    /// Create a server with a `system` group and an all-privileged `root` user
    pub fn new() -> Self {
        let mut state = MockState::new();
        let root_group = state.next_id();
        let root_user = state.next_id();
        state.world.groups.insert(
            root_group,
            Group {
                id: root_group,
                name: "system".to_string(),
            },
        );
        state.world.users.insert(
            root_user,
            User {
                id: root_user,
                name: "root".to_string(),
                groups: BTreeSet::from([root_group]),
                default_group: root_group,
                privileges: Privilege::all(),
            },
        );
        let root_session = uuid::Uuid::new_v4().to_string();
        state.sessions.insert(root_session.clone(), root_user);

        Self {
            state: Arc::new(Mutex::new(state)),
            failures: Arc::new(Mutex::new(FailureInjector::new())),
            timing: Arc::new(Mutex::new(Timing::default())),
            requests: Arc::new(AtomicU64::new(0)),
            root_user,
            root_group,
            root_session,
        }
    }

    // === Public API for test configuration ===

    pub fn root_session(&self) -> String {
        self.root_session.clone()
    }

    pub fn root_user(&self) -> i64 {
        self.root_user
    }

    pub fn root_group(&self) -> i64 {
        self.root_group
    }

    pub fn add_group(&self, name: &str) -> i64 {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.world.groups.insert(
            id,
            Group {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    /// Add a user; the first group is the default one
    pub fn add_user(&self, name: &str, groups: &[i64], privileges: &[Privilege]) -> i64 {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state.world.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
                groups: groups.iter().copied().collect(),
                default_group: groups.first().copied().unwrap_or(self.root_group),
                privileges: privileges.iter().copied().collect(),
            },
        );
        id
    }

    /// Log `user` in and return the new session key
    pub fn session_for(&self, user: i64) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        lock(&self.state).sessions.insert(key.clone(), user);
        key
    }

    pub fn add_object(&self, type_name: &str, owner: i64, group: i64) -> i64 {
        let mut state = lock(&self.state);
        let id = state.next_id();
        state
            .world
            .graph
            .insert(ObjRef::new(type_name, id), Ownership { owner, group });
        id
    }

    /// Add an object under a fixed id
    pub fn add_object_with_id(&self, type_name: &str, id: i64, owner: i64, group: i64) {
        let mut state = lock(&self.state);
        state.reserve_id(id);
        state
            .world
            .graph
            .insert(ObjRef::new(type_name, id), Ownership { owner, group });
    }

    /// Add a parent → child edge; false if either end is missing
    pub fn link(&self, parent: &ObjRef, child: &ObjRef) -> bool {
        lock(&self.state).world.graph.add_edge(parent, child)
    }

    /// Store an annotation link and return its id
    pub fn add_annotation_link(&self, link_type: &str, parent: &ObjRef, annotation: &ObjRef) -> Option<i64> {
        let mut state = lock(&self.state);
        let id = state.next_id();
        let stored = StoredLink {
            link_type: link_type.to_string(),
            parent: parent.clone(),
            annotation: annotation.clone(),
        };
        state.world.graph.add_link(id, stored).then_some(id)
    }

    pub fn link_exists(&self, id: i64) -> bool {
        lock(&self.state).world.graph.link(id).is_some()
    }

    pub fn object(&self, obj: &ObjRef) -> Option<Ownership> {
        lock(&self.state).object(obj).copied()
    }

    pub fn exists(&self, obj: &ObjRef) -> bool {
        self.object(obj).is_some()
    }

    /// Put bytes for `OriginalFile:id` on the backing store
    pub fn add_file(&self, id: i64) {
        lock(&self.state).world.files.insert(id);
    }

    /// Drop backing bytes without touching the database record
    pub fn remove_file(&self, id: i64) -> bool {
        lock(&self.state).world.files.remove(&id)
    }

    pub fn file_exists(&self, id: i64) -> bool {
        lock(&self.state).world.files.contains(&id)
    }

    pub fn add_repo(&self, name: &str) {
        lock(&self.state).world.repos.entry(name.to_string()).or_default();
    }

    pub fn repo_has_path(&self, repo: &str, path: &str) -> bool {
        lock(&self.state)
            .world
            .repos
            .get(repo)
            .map(|paths| paths.contains(path))
            .unwrap_or(false)
    }

    /// Set the backoff measurement reported by probe
    pub fn backoff(&self, count: u64, ms: u64) {
        lock(&self.timing).backoff = Backoff { count, ms };
    }

    /// Set how many steps each status query advances
    pub fn advance_on_poll(&self, steps: u32) {
        lock(&self.timing).steps_per_poll = steps.max(1);
    }

    /// Keep a handle RUNNING until released
    pub fn hold(&self, handle: &str) {
        if let Some(execution) = lock(&self.state).executions.get_mut(handle) {
            execution.held = true;
        }
    }

    pub fn release(&self, handle: &str) {
        if let Some(execution) = lock(&self.state).executions.get_mut(handle) {
            execution.held = false;
        }
    }

    pub fn inject_error(&self, op: Operation, code: &str, message: &str) {
        lock(&self.failures).inject_error(op, code, message);
    }

    pub fn inject_failure(&self, op: Operation, config: FailureConfig) {
        lock(&self.failures).inject(op, config);
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Envelopes received so far
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Handles accepted but not yet closed
    pub fn open_handles(&self) -> Vec<String> {
        lock(&self.state).open_handles()
    }

    /// Current status of a handle without advancing it
    pub fn peek_status(&self, handle: &str) -> Option<Status> {
        lock(&self.state).executions.get(handle).map(|e| e.status.clone())
    }

    // === Request handling ===

    /// Handle one envelope (in-process library mode)
    pub fn handle_request(&self, request: &RpcRequest) -> RpcResponse {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(failure) = self.check_failure(request.op) {
            if let Some(delay) = failure.delay {
                std::thread::sleep(delay);
            }
            if failure.error_code.is_some() {
                return Self::failure_response(request, failure);
            }
        }

        if let Err(e) = Self::validate_protocol_version(request) {
            return e;
        }

        self.dispatch(request)
    }

    /// Handle a JSON request line (command-transport server mode)
    pub fn handle_json(&self, json_request: &str) -> Result<String, serde_json::Error> {
        let request: RpcRequest = serde_json::from_str(json_request)?;
        let response = self.handle_request(&request);
        serde_json::to_string(&response)
    }

    // === Internal helpers ===

    fn check_failure(&self, op: Operation) -> Option<FailureConfig> {
        lock(&self.failures).check(op)
    }

    fn failure_response(request: &RpcRequest, failure: FailureConfig) -> RpcResponse {
        let code = failure
            .error_code
            .unwrap_or_else(|| ErrorCode::InternalError.as_str().to_string());
        let message = failure
            .error_message
            .unwrap_or_else(|| "Injected failure".to_string());
        RpcResponse::error(
            request.protocol_version,
            request.request_id.clone(),
            RpcErrorPayload::new(code, message),
        )
    }

    fn reject(request: &RpcRequest, error: RpcError) -> RpcResponse {
        RpcResponse::error(
            request.protocol_version,
            request.request_id.clone(),
            error.into_payload(),
        )
    }

    fn reply<T: Serialize>(request: &RpcRequest, payload: &T) -> RpcResponse {
        match serde_json::to_value(payload) {
            Ok(value) => RpcResponse::success(request.protocol_version, request.request_id.clone(), value),
            Err(e) => Self::reject(request, RpcError::new(ErrorCode::InternalError, e.to_string())),
        }
    }

    fn validate_protocol_version(request: &RpcRequest) -> Result<(), RpcResponse> {
        if request.op.accepts_version_zero() {
            if request.protocol_version != 0 {
                return Err(Self::reject(
                    request,
                    RpcError::unsupported_protocol(request.protocol_version, 0, 0),
                ));
            }
            return Ok(());
        }

        if request.protocol_version < PROTOCOL_MIN || request.protocol_version > PROTOCOL_MAX {
            return Err(Self::reject(
                request,
                RpcError::unsupported_protocol(request.protocol_version, PROTOCOL_MIN, PROTOCOL_MAX),
            ));
        }

        Ok(())
    }

    fn handle_id(request: &RpcRequest) -> Result<String, RpcResponse> {
        serde_json::from_value::<HandleRequest>(request.payload.clone())
            .map(|payload| payload.handle)
            .map_err(|e| Self::reject(request, RpcError::invalid_request(format!("bad handle payload: {}", e))))
    }

    fn dispatch(&self, request: &RpcRequest) -> RpcResponse {
        let result = match request.op {
            Operation::Probe => Ok(self.handle_probe(request)),
            Operation::Submit => self.handle_submit(request),
            Operation::Status => self.handle_status(request),
            Operation::Response => self.handle_response(request),
            Operation::Cancel => self.handle_cancel(request),
            Operation::Close => self.handle_close(request),
        };
        result.unwrap_or_else(|rejection| rejection)
    }

    // === Operation handlers ===

    fn handle_probe(&self, request: &RpcRequest) -> RpcResponse {
        let backoff = lock(&self.timing).backoff;
        RpcResponse::success(
            0,
            request.request_id.clone(),
            json!({
                "protocol_min": PROTOCOL_MIN,
                "protocol_max": PROTOCOL_MAX,
                "server_version": SERVER_VERSION,
                "backoff": backoff,
            }),
        )
    }

    fn handle_submit(&self, request: &RpcRequest) -> Result<RpcResponse, RpcResponse> {
        let submit: SubmitRequest = serde_json::from_value(request.payload.clone())
            .map_err(|e| Self::reject(request, RpcError::invalid_request(format!("malformed submit: {}", e))))?;

        let mut state = lock(&self.state);
        let user = submit
            .session
            .as_deref()
            .and_then(|key| state.user_for_session(key))
            .cloned()
            .ok_or_else(|| Self::reject(request, RpcError::security_violation("unknown or missing session")))?;

        submit
            .request
            .validate()
            .map_err(|e| Self::reject(request, RpcError::invalid_request(e.to_string())))?;

        let scope = match submit.context.get(GROUP_CONTEXT_KEY) {
            None => GroupScope::One(user.default_group),
            Some(raw) => match raw.parse::<i64>() {
                Ok(ALL_GROUPS) => GroupScope::All,
                Ok(group) if user.member_of(group) || user.is_admin() => GroupScope::One(group),
                Ok(group) => {
                    return Err(Self::reject(
                        request,
                        RpcError::security_violation(format!(
                            "user {} is not a member of group {}",
                            user.name, group
                        )),
                    ))
                }
                Err(_) => {
                    return Err(Self::reject(
                        request,
                        RpcError::invalid_request(format!("{} must be a group id, got '{}'", GROUP_CONTEXT_KEY, raw)),
                    ))
                }
            },
        };

        let handle = uuid::Uuid::new_v4().to_string();
        let total = submit.request.step_count();
        state.executions.insert(
            handle.clone(),
            Execution {
                handle: handle.clone(),
                request: submit.request,
                caller: Caller { user, scope },
                status: Status::running(handle.clone(), total),
                response: None,
                held: false,
                closed: false,
            },
        );

        Ok(RpcResponse::success(
            request.protocol_version,
            request.request_id.clone(),
            json!({ "handle": handle, "total": total }),
        ))
    }

    fn handle_status(&self, request: &RpcRequest) -> Result<RpcResponse, RpcResponse> {
        let id = Self::handle_id(request)?;
        let steps = lock(&self.timing).steps_per_poll;

        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let execution = Self::open_execution(request, &mut state.executions, &id)?;

        if execution.status.is_running() && !execution.held {
            let status = &mut execution.status;
            status.step = status.step.saturating_add(steps).min(status.total);
            if status.step >= status.total {
                let response = engine::execute(&mut state.world, &execution.caller, &execution.request);
                execution.status.finish(response.is_error(), false);
                execution.response = Some(response);
            }
        }

        Ok(Self::reply(request, &execution.status))
    }

    fn handle_response(&self, request: &RpcRequest) -> Result<RpcResponse, RpcResponse> {
        let id = Self::handle_id(request)?;
        let mut state = lock(&self.state);
        let execution = Self::open_execution(request, &mut state.executions, &id)?;

        match &execution.response {
            Some(response) => Ok(Self::reply(request, response)),
            None => Err(Self::reject(request, RpcError::not_finished(&id))),
        }
    }

    fn handle_cancel(&self, request: &RpcRequest) -> Result<RpcResponse, RpcResponse> {
        let id = Self::handle_id(request)?;
        let mut state = lock(&self.state);
        let execution = Self::open_execution(request, &mut state.executions, &id)?;

        let cancelled = execution.status.is_running();
        if cancelled {
            execution.status.finish(true, true);
            execution.response = Some(Response::Err(ErrorInfo::new("cancel", "cancelled")));
        }

        Ok(RpcResponse::success(
            request.protocol_version,
            request.request_id.clone(),
            json!({ "handle": id, "cancelled": cancelled }),
        ))
    }

    fn handle_close(&self, request: &RpcRequest) -> Result<RpcResponse, RpcResponse> {
        let id = Self::handle_id(request)?;
        let mut state = lock(&self.state);

        // Closed executions stay behind so later calls report HANDLE_CLOSED
        let closed = match state.executions.get_mut(&id) {
            Some(execution) if !execution.closed => {
                execution.closed = true;
                true
            }
            _ => false,
        };

        Ok(RpcResponse::success(
            request.protocol_version,
            request.request_id.clone(),
            json!({ "handle": id, "closed": closed }),
        ))
    }

    fn open_execution<'s>(
        request: &RpcRequest,
        executions: &'s mut std::collections::HashMap<String, Execution>,
        id: &str,
    ) -> Result<&'s mut Execution, RpcResponse> {
        match executions.get_mut(id) {
            None => Err(Self::reject(request, RpcError::handle_not_found(id))),
            Some(execution) if execution.closed => Err(Self::reject(request, RpcError::handle_closed(id))),
            Some(execution) => Ok(execution),
        }
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}
