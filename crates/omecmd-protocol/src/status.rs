//! Status snapshots for in-flight commands.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State flags carried by a [`Status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusFlag {
    /// The command is still executing.
    Running,
    /// The command was cancelled before completing.
    Cancelled,
    /// The command stopped with an error response.
    Failure,
}

/// One poll's view of a command. Never cached: every poll fetches a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Handle this snapshot belongs to.
    pub handle: String,
    /// Current flags.
    pub flags: BTreeSet<StatusFlag>,
    /// Steps completed so far.
    pub step: u32,
    /// Total steps the command will report.
    pub total: u32,
    /// When execution was accepted.
    pub started_at: DateTime<Utc>,
    /// When execution stopped, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Status {
    /// Fresh status for a newly accepted command.
    pub fn running(handle: impl Into<String>, total: u32) -> Self {
        Self {
            handle: handle.into(),
            flags: BTreeSet::from([StatusFlag::Running]),
            step: 0,
            total,
            started_at: Utc::now(),
            stopped_at: None,
        }
    }

    pub fn has(&self, flag: StatusFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_running(&self) -> bool {
        self.has(StatusFlag::Running)
    }

    /// A status is terminal once RUNNING is gone.
    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }

    pub fn has_failure(&self) -> bool {
        self.has(StatusFlag::Failure)
    }

    pub fn is_cancelled(&self) -> bool {
        self.has(StatusFlag::Cancelled)
    }

    /// Leave RUNNING, optionally adding FAILURE/CANCELLED.
    pub fn finish(&mut self, failure: bool, cancelled: bool) {
        self.flags.remove(&StatusFlag::Running);
        if failure {
            self.flags.insert(StatusFlag::Failure);
        }
        if cancelled {
            self.flags.insert(StatusFlag::Cancelled);
        }
        self.stopped_at = Some(Utc::now());
    }

    /// Flags rendered as `RUNNING|FAILURE` for logs.
    pub fn flags_label(&self) -> String {
        if self.flags.is_empty() {
            return "-".to_string();
        }
        self.flags
            .iter()
            .map(|flag| match flag {
                StatusFlag::Running => "RUNNING",
                StatusFlag::Cancelled => "CANCELLED",
                StatusFlag::Failure => "FAILURE",
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}
