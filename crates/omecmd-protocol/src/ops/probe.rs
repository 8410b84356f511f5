//! Probe operation types.
//!
//! Protocol negotiation plus the server's own timing measurement.

use serde::{Deserialize, Serialize};

/// Probe response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResponse {
    /// Lowest protocol version the server accepts.
    pub protocol_min: i32,
    /// Highest protocol version the server accepts.
    pub protocol_max: i32,
    /// Server build identifier.
    pub server_version: String,
    /// Backoff the server currently applies to its slowest background work.
    #[serde(default)]
    pub backoff: Backoff,
}

/// Server backoff measurement.
///
/// `count × ms` is how long the server expects background work to take;
/// clients use it to scale their polling budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub count: u64,
    pub ms: u64,
}

impl Backoff {
    /// Expected delay in milliseconds.
    pub fn expected_ms(&self) -> u64 {
        self.count.saturating_mul(self.ms)
    }
}
