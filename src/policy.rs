// src/policy.rs

//! Pluggable scheduling policies.
//!
//! A policy receives a snapshot of every eligible task across jobs and
//! returns them in dispatch order. It never touches graph state, so it can
//! be swapped while jobs are in flight.

use std::fmt;
use std::sync::Arc;

use crate::ids::TaskId;
use crate::types::{JobPriority, PolicyKind};

/// One eligible task as seen by a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleTask {
    pub task: TaskId,
    pub priority: JobPriority,
    pub resources: u32,
    /// Insertion sequence inside the task's job.
    pub sequence: u64,
}

pub trait SchedulingPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Order `eligible` for dispatch. Tasks may be dropped to hold them
    /// back until the next round.
    fn order(&self, eligible: Vec<EligibleTask>) -> Vec<EligibleTask>;
}

/// Higher job priority first, then older jobs, then task insertion order.
#[derive(Debug, Default, Clone, Copy)]
pub struct PriorityPolicy;

impl SchedulingPolicy for PriorityPolicy {
    fn name(&self) -> &'static str {
        "priority"
    }

    fn order(&self, mut eligible: Vec<EligibleTask>) -> Vec<EligibleTask> {
        eligible.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.task.job().cmp(b.task.job()))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        eligible
    }
}

/// Older jobs first, then task insertion order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

impl SchedulingPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn order(&self, mut eligible: Vec<EligibleTask>) -> Vec<EligibleTask> {
        eligible.sort_by(|a, b| {
            a.task
                .job()
                .cmp(b.task.job())
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        eligible
    }
}

pub fn policy_for(kind: PolicyKind) -> Arc<dyn SchedulingPolicy> {
    match kind {
        PolicyKind::Priority => Arc::new(PriorityPolicy),
        PolicyKind::Fifo => Arc::new(FifoPolicy),
    }
}
