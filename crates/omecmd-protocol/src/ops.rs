//! Operation-specific types.

pub mod handle;
pub mod probe;
pub mod submit;

pub use handle::{CancelResponse, CloseResponse, HandleRequest};
pub use probe::{Backoff, ProbeResponse};
pub use submit::{SubmitRequest, SubmitResponse};

/// Known operation names.
pub mod names {
    pub const PROBE: &str = "probe";
    pub const SUBMIT: &str = "submit";
    pub const STATUS: &str = "status";
    pub const RESPONSE: &str = "response";
    pub const CANCEL: &str = "cancel";
    pub const CLOSE: &str = "close";
}
