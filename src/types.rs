use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Job priority, from least to most urgent.
///
/// The derived ordering follows declaration order, so `Highest > Idle`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Idle,
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl FromStr for JobPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "idle" => Ok(JobPriority::Idle),
            "lowest" => Ok(JobPriority::Lowest),
            "low" => Ok(JobPriority::Low),
            "normal" => Ok(JobPriority::Normal),
            "high" => Ok(JobPriority::High),
            "highest" => Ok(JobPriority::Highest),
            other => Err(format!(
                "invalid priority: {other} (expected idle, lowest, low, normal, high or highest)"
            )),
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPriority::Idle => "idle",
            JobPriority::Lowest => "lowest",
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Highest => "highest",
        };
        f.write_str(s)
    }
}

/// Which built-in scheduling policy to install.
///
/// - `Priority`: higher job priority first, then older jobs, then task
///   insertion order (default).
/// - `Fifo`: older jobs first, then task insertion order; priority ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    Priority,
    Fifo,
}

impl Default for PolicyKind {
    fn default() -> Self {
        PolicyKind::Priority
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "priority" => Ok(PolicyKind::Priority),
            "fifo" => Ok(PolicyKind::Fifo),
            other => Err(format!(
                "invalid policy: {other} (expected \"priority\" or \"fifo\")"
            )),
        }
    }
}

/// Scheduler-wide knobs.
///
/// Per-task and per-job settings in a job template override the
/// `max_number_of_execution*` and `cancel_job_on_error` defaults here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Executions allowed for a task ending in a user exception.
    pub max_number_of_execution: u32,
    /// Executions allowed for a task whose resource failed under it.
    pub max_number_of_execution_on_failure: u32,
    pub cancel_job_on_error: bool,
    /// Period of the scheduling loop tick.
    pub schedule_interval_ms: u64,
    /// Capacity of the runtime event channel.
    pub event_queue_length: usize,
    pub policy: PolicyKind,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            max_number_of_execution: 1,
            max_number_of_execution_on_failure: 2,
            cancel_job_on_error: false,
            schedule_interval_ms: 100,
            event_queue_length: 64,
            policy: PolicyKind::Priority,
        }
    }
}
