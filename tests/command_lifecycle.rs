//! Command Lifecycle Tests
//!
//! Submit → poll → response → close against the mock server: idempotent
//! close on every terminal path, the timeout boundary, step handler
//! ordering, cancellation and the probe-derived scaling factor.

mod fixtures;

use std::sync::Arc;

use fixtures::{fast_callback, root_client, root_context};
use omecmd::callback::{submit_and_wait, CallbackError, CmdCallback, StepEvent};
use omecmd::classify::{classify, ClassifyError, Outcome};
use omecmd::host::{CallContext, ClientError, Handle};
use omecmd::mock::MockServer;
use omecmd::protocol::{Operation, Request, StatusFlag};
use omecmd::signal::SignalState;

// =============================================================================
// Idempotent close on all three terminal paths
// =============================================================================

#[test]
fn test_close_is_idempotent_after_success() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    let completion = CmdCallback::new(&client, &handle, fast_callback()).block().unwrap();
    assert!(classify(&completion, true).unwrap().is_success());

    client.close(&handle).unwrap();
    client.close(&handle).unwrap();
    // A fresh handle object for the same id reaches the server, which answers closed=false
    client.close(&Handle::attach(handle.id())).unwrap();
    assert!(server.open_handles().is_empty());
}

#[test]
fn test_close_is_idempotent_after_failure() {
    let server = MockServer::new();
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [404]), &CallContext::new())
        .unwrap();
    let completion = CmdCallback::new(&client, &handle, fast_callback()).block().unwrap();
    assert!(completion.status.has_failure());
    assert!(matches!(classify(&completion, false), Ok(Outcome::Failed(_))));

    client.close(&handle).unwrap();
    client.close(&handle).unwrap();
    assert!(server.open_handles().is_empty());
}

#[test]
fn test_close_is_idempotent_after_timeout() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    server.hold(handle.id());

    let err = CmdCallback::new(&client, &handle, fast_callback()).block().unwrap_err();
    assert!(matches!(err, CallbackError::Timeout { .. }));

    client.close(&handle).unwrap();
    client.close(&handle).unwrap();
    assert!(server.open_handles().is_empty());
    // The held command never ran
    assert!(server.exists(&fixtures::obj("Image", image)));
}

#[test]
fn test_closed_handle_rejects_further_calls() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    client.close(&handle).unwrap();

    // Locally known to be closed
    assert!(matches!(client.status(&handle), Err(ClientError::HandleClosed { .. })));
    // Server-side tombstone
    let attached = Handle::attach(handle.id());
    assert!(matches!(client.status(&attached), Err(ClientError::HandleClosed { .. })));
    assert!(matches!(client.response(&attached), Err(ClientError::HandleClosed { .. })));
    assert!(matches!(client.cancel(&attached), Err(ClientError::HandleClosed { .. })));
}

#[test]
fn test_unknown_handle_not_found() {
    let server = MockServer::new();
    let client = root_client(&server);
    let err = client.status(&Handle::attach("no-such-handle")).unwrap_err();
    assert!(matches!(err, ClientError::HandleNotFound { .. }));
}

#[test]
fn test_submit_and_wait_closes_handle() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let completion = submit_and_wait(
        &client,
        &Request::delete("Image", [image]),
        &CallContext::new(),
        fast_callback(),
    )
    .unwrap();
    assert!(!completion.response.is_error());
    assert!(server.open_handles().is_empty());
}

// =============================================================================
// Timeout boundary
// =============================================================================

#[test]
fn test_timeout_after_exactly_n_polls() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    server.hold(handle.id());

    let before = server.request_count();
    let mut config = fast_callback();
    config.loops = 5;
    let err = CmdCallback::new(&client, &handle, config).block().unwrap_err();

    match err {
        CallbackError::Timeout {
            loops, last_status, ..
        } => {
            assert_eq!(loops, 5);
            assert!(last_status.unwrap().is_running());
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(server.request_count() - before, 5);
    client.close(&handle).unwrap();
}

#[test]
fn test_finishing_on_last_poll_is_not_a_timeout() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();

    // Delete takes three steps at one step per poll
    let mut config = fast_callback();
    config.loops = 3;
    let completion = CmdCallback::new(&client, &handle, config).block().unwrap();
    assert!(completion.status.is_terminal());
    assert!(!completion.status.has(StatusFlag::Failure));
    client.close(&handle).unwrap();
}

#[test]
fn test_release_lets_held_command_finish() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    server.hold(handle.id());
    let mut config = fast_callback();
    config.loops = 2;
    assert!(CmdCallback::new(&client, &handle, config).block().is_err());

    server.release(handle.id());
    let completion = CmdCallback::new(&client, &handle, fast_callback()).block().unwrap();
    assert!(!completion.response.is_error());
    client.close(&handle).unwrap();
}

// =============================================================================
// Step handler ordering
// =============================================================================

#[test]
fn test_step_handler_sees_increasing_steps() {
    let server = MockServer::new();
    let images: Vec<i64> = (0..3)
        .map(|_| server.add_object("Image", server.root_user(), server.root_group()))
        .collect();
    let client = root_client(&server);

    // Three deletes in one batch: nine steps
    let request = Request::do_all(images.iter().map(|&id| Request::delete("Image", [id])).collect());
    let handle = client.submit(&request, &CallContext::new()).unwrap();
    assert_eq!(handle.total_steps(), 9);

    let mut events: Vec<StepEvent> = Vec::new();
    let completion = CmdCallback::new(&client, &handle, fast_callback())
        .on_step(|event| events.push(event))
        .block()
        .unwrap();
    client.close(&handle).unwrap();

    assert!(!completion.response.is_error());
    // Fires while running only; the final step is reported with the terminal status
    let steps: Vec<u32> = events.iter().map(|e| e.step).collect();
    assert_eq!(steps, (1..9).collect::<Vec<u32>>());
    assert!(events.iter().all(|e| e.total == 9));
}

#[test]
fn test_step_handler_with_two_steps_per_poll() {
    let server = MockServer::new();
    server.advance_on_poll(2);
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    let mut steps = Vec::new();
    CmdCallback::new(&client, &handle, fast_callback())
        .on_step(|event| steps.push(event.step))
        .block()
        .unwrap();
    client.close(&handle).unwrap();

    assert_eq!(steps, vec![2]);
}

#[test]
fn test_step_handler_edits_before_execution_point() {
    let server = MockServer::new();
    let (owner, group) = (server.root_user(), server.root_group());
    let project = fixtures::obj("Project", server.add_object("Project", owner, group));
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Project", [project.id]), &CallContext::new())
        .unwrap();

    // A concurrent edit lands while the delete is still running
    let editor = server.clone();
    let mut added = None;
    let completion = CmdCallback::new(&client, &handle, fast_callback())
        .on_step(|event| {
            if event.step == 1 {
                let dataset = fixtures::obj("Dataset", editor.add_object("Dataset", owner, group));
                assert!(editor.link(&project, &dataset));
                added = Some(dataset);
            }
        })
        .block()
        .unwrap();
    client.close(&handle).unwrap();

    let dataset = added.expect("handler ran at step 1");
    let deleted = &completion.response.success().unwrap().deleted;
    assert_eq!(deleted.ids("Dataset"), &[dataset.id]);
    assert!(!server.exists(&dataset));
}

#[test]
fn test_do_change_with_steps_through_context() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let mut ctx = root_context(&server);

    let mut seen = 0;
    let outcome = ctx
        .do_change_with_steps(&Request::delete("Image", [image]), true, &CallContext::new(), |_| {
            seen += 1
        })
        .unwrap();
    assert_eq!(outcome.deleted_ids("Image"), &[image]);
    assert_eq!(seen, 2);
    assert!(server.open_handles().is_empty());
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_cancel_running_command() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = root_client(&server);

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    assert!(client.cancel(&handle).unwrap());
    assert!(!client.cancel(&handle).unwrap(), "second cancel finds it stopped");

    let completion = CmdCallback::new(&client, &handle, fast_callback()).block().unwrap();
    assert!(completion.status.is_cancelled());
    assert!(completion.status.has_failure());
    assert!(completion.response.error().unwrap().is("cancel", "cancelled"));
    client.close(&handle).unwrap();

    assert!(server.exists(&fixtures::obj("Image", image)));
}

#[test]
fn test_interrupt_closes_in_flight_handle() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let client = Arc::new(root_client(&server));

    let handle = client
        .submit(&Request::delete("Image", [image]), &CallContext::new())
        .unwrap();
    server.hold(handle.id());

    let state = SignalState::new();
    state.set_client(Arc::clone(&client));
    state.register(&handle);
    assert_eq!(state.close_in_flight(), 1);

    let err = CmdCallback::new(&client, &handle, fast_callback()).block().unwrap_err();
    assert!(matches!(err, CallbackError::Closed { .. }));
    assert_eq!(err.exit_code(), 80);
    assert!(server.open_handles().is_empty());
}

// =============================================================================
// Classification through the run context
// =============================================================================

#[test]
fn test_do_change_unexpected_failure() {
    let server = MockServer::new();
    let mut ctx = root_context(&server);

    let err = ctx
        .do_change(&Request::delete("Image", [404]), true, &CallContext::new())
        .unwrap_err();
    match err {
        omecmd::ContextError::Classify(ClassifyError::UnexpectedFailure { info }) => {
            assert!(info.is("graph", "missing-object"));
            assert_eq!(info.param("id"), Some("404"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(server.open_handles().is_empty());
}

#[test]
fn test_do_change_unexpected_success() {
    let server = MockServer::new();
    let image = server.add_object("Image", server.root_user(), server.root_group());
    let mut ctx = root_context(&server);

    let err = ctx
        .do_change(&Request::delete("Image", [image]), false, &CallContext::new())
        .unwrap_err();
    assert!(matches!(
        err,
        omecmd::ContextError::Classify(ClassifyError::UnexpectedSuccess)
    ));
    assert_eq!(err.exit_code(), 60);
}

#[test]
fn test_submit_rejections_are_not_retried() {
    let server = MockServer::new();
    let client = root_client(&server);
    server.inject_error(Operation::Submit, "INTERNAL_ERROR", "boom");

    let before = server.request_count();
    let err = client
        .submit(&Request::delete("Image", [1]), &CallContext::new())
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert_eq!(server.request_count() - before, 1);
}

#[test]
fn test_unknown_session_rejected() {
    let server = MockServer::new();
    let client = fixtures::client_with_session(&server, "not-a-session".to_string());
    let err = client
        .submit(&Request::delete("Image", [1]), &CallContext::new())
        .unwrap_err();
    assert!(matches!(err, ClientError::Rejected { .. }));
    assert_eq!(err.exit_code(), 30);
}

// =============================================================================
// Scaling factor
// =============================================================================

#[test]
fn test_scaling_factor_from_server_backoff() {
    let server = MockServer::new();
    server.backoff(3, 4);
    let ctx = root_context(&server);

    assert_eq!(ctx.probe().backoff.expected_ms(), 12);
    assert_eq!(ctx.scaling_ms(), 12);
    assert_eq!(ctx.callback_config().ms_per_loop, 12);
}

#[test]
fn test_scaling_factor_keeps_configured_floor() {
    let server = MockServer::new();
    let ctx = root_context(&server);
    assert_eq!(ctx.scaling_ms(), fast_callback().ms_per_loop);
}
