// src/dag/dispatch.rs

//! Requests handed to the execution boundary.

use serde::{Deserialize, Serialize};

use crate::dag::template::{FlowSpec, TaskKind};
use crate::ids::TaskId;

/// One task instance to run on external resources.
///
/// The declared flow is passed along so the executor knows which kind of
/// [`crate::dag::FlowAction`] it is expected to report back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub task: TaskId,
    pub resources: u32,
    pub kind: TaskKind,
    pub flow: Option<FlowSpec>,
    /// 1 for the first execution, incremented on every restart.
    pub attempt: u32,
}
