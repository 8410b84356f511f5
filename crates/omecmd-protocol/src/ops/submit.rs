//! Submit operation types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::request::Request;

/// Submit request payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Session key identifying the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// The work to perform.
    pub request: Request,
    /// Call-context overrides (e.g. `omero.group`).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Submit response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Opaque handle for the accepted command.
    pub handle: String,
    /// Steps the server will report.
    pub total: u32,
}
