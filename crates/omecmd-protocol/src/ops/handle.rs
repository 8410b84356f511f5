//! Handle-scoped operation types (status, response, cancel, close).

use serde::{Deserialize, Serialize};

/// Payload shared by every operation that addresses an existing handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleRequest {
    /// The handle issued by submit.
    pub handle: String,
}

/// Cancel response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelResponse {
    pub handle: String,
    /// False when the command had already stopped.
    pub cancelled: bool,
}

/// Close response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseResponse {
    pub handle: String,
    /// False when the handle was already closed or unknown.
    pub closed: bool,
}
