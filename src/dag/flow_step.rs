// src/dag/flow_step.rs

//! Result types for flow-control graph edits.

use crate::ids::TaskId;

/// Which flow action produced a [`GraphStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Continue,
    If,
    Loop,
    Replicate,
}

/// Structured summary of one committed graph edit.
///
/// Tests use it to assert on what a flow action changed without diffing
/// the whole graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStep {
    pub kind: FlowKind,
    /// Task instances created by LOOP or REPLICATE.
    pub created: Vec<TaskId>,
    /// Task instances removed from the live graph by IF.
    pub pruned: Vec<TaskId>,
    /// Existing tasks whose parents changed.
    pub rewired: Vec<TaskId>,
}

impl GraphStep {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.pruned.is_empty() && self.rewired.is_empty()
    }
}
