//! omecmd Protocol Types
//!
//! Defines the JSON RPC envelope and the command model (requests, status,
//! responses) for the asynchronous command protocol.

pub mod envelope;
pub mod error;
pub mod ids;
pub mod ops;
pub mod request;
pub mod response;
pub mod status;

pub use envelope::{Operation, RpcErrorPayload, RpcRequest, RpcResponse};
pub use error::{ErrorCode, RpcError};
pub use ids::IdMap;
pub use request::{Request, RequestError};
pub use response::{ErrorInfo, Response, Success};
pub use status::{Status, StatusFlag};

/// Protocol version used for probe requests (sentinel value).
pub const PROTOCOL_VERSION_PROBE: i32 = 0;

/// Minimum protocol version supported by this implementation.
pub const PROTOCOL_MIN: i32 = 1;

/// Maximum protocol version supported by this implementation.
pub const PROTOCOL_MAX: i32 = 1;

/// Context key selecting the security group a call acts under.
pub const GROUP_CONTEXT_KEY: &str = "omero.group";

/// Group id meaning "every group the caller belongs to".
pub const ALL_GROUPS: i64 = -1;
