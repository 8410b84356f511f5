//! Shared helpers for integration tests
//!
//! Every test drives an in-process `MockServer` through `MockTransport`.
//! Intervals are kept at a few milliseconds so the poll loops finish fast.

#![allow(dead_code)]

use std::sync::Arc;

use omecmd::callback::{BackoffPolicy, CallbackConfig};
use omecmd::config::ClientSettings;
use omecmd::host::{CmdClient, MockTransport};
use omecmd::mock::{MockServer, ObjRef};
use omecmd::RunContext;

/// Callback budget small enough for tests: 20 polls, 2ms cap
pub fn fast_callback() -> CallbackConfig {
    CallbackConfig {
        loops: 20,
        ms_per_loop: 2,
        initial_interval_ms: 1,
        backoff: BackoffPolicy::Exponential,
    }
}

pub fn fast_settings() -> ClientSettings {
    ClientSettings {
        callback: fast_callback(),
        ..ClientSettings::default()
    }
}

/// Probed client logged in with `session`
pub fn client_with_session(server: &MockServer, session: String) -> CmdClient {
    let mut client = CmdClient::new(Arc::new(MockTransport::with_server(server.clone()))).with_session(session);
    client.probe().expect("probe against mock server");
    client
}

/// Probed client logged in as root
pub fn root_client(server: &MockServer) -> CmdClient {
    client_with_session(server, server.root_session())
}

/// Run context logged in as root with fast callback settings
pub fn root_context(server: &MockServer) -> RunContext {
    context_for(server, server.root_session())
}

pub fn context_for(server: &MockServer, session: String) -> RunContext {
    let client = CmdClient::new(Arc::new(MockTransport::with_server(server.clone()))).with_session(session);
    RunContext::setup(client, &fast_settings()).expect("run context setup")
}

pub fn obj(type_name: &str, id: i64) -> ObjRef {
    ObjRef::new(type_name, id)
}

/// Image 42 owning Pixels 7 and OriginalFile 9, the file present on disk
pub fn image_with_pixels_and_file(server: &MockServer) -> (ObjRef, ObjRef, ObjRef) {
    let (owner, group) = (server.root_user(), server.root_group());
    server.add_object_with_id("Image", 42, owner, group);
    server.add_object_with_id("Pixels", 7, owner, group);
    server.add_object_with_id("OriginalFile", 9, owner, group);
    server.add_file(9);

    let image = obj("Image", 42);
    let pixels = obj("Pixels", 7);
    let file = obj("OriginalFile", 9);
    assert!(server.link(&image, &pixels));
    assert!(server.link(&image, &file));
    (image, pixels, file)
}

/// Project → Dataset → Image chain owned by `owner` in `group`
pub fn project_dataset_image(server: &MockServer, owner: i64, group: i64) -> (ObjRef, ObjRef, ObjRef) {
    let project = obj("Project", server.add_object("Project", owner, group));
    let dataset = obj("Dataset", server.add_object("Dataset", owner, group));
    let image = obj("Image", server.add_object("Image", owner, group));
    assert!(server.link(&project, &dataset));
    assert!(server.link(&dataset, &image));
    (project, dataset, image)
}
