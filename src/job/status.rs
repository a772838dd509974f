// src/job/status.rs

//! Job lifecycle states and aggregate task counters.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a job.
///
/// `Pending -> Running -> (Stalled <-> Running) -> Finished`. `Paused` can be
/// entered from Pending, Running or Stalled and returns to where it left.
/// `Cancelled`, `Failed` and `Killed` are terminal alternatives to
/// `Finished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    /// Nothing running, but tasks are left to do.
    Stalled,
    Paused,
    Finished,
    /// A task exhausted its executions on a user error and the job cancels
    /// on error.
    Cancelled,
    /// A task exhausted its executions on resource failures and the job
    /// cancels on error.
    Failed,
    Killed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Cancelled | JobStatus::Failed | JobStatus::Killed
        )
    }

    pub fn can_pause(self) -> bool {
        matches!(
            self,
            JobStatus::Pending | JobStatus::Running | JobStatus::Stalled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Stalled => "stalled",
            JobStatus::Paused => "paused",
            JobStatus::Finished => "finished",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
            JobStatus::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// Task counts for one job.
///
/// `total` counts every instance ever created, including pruned ones;
/// `finished` counts every instance in a terminal state, pruned included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounters {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub finished: usize,
}
