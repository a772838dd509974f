// src/config/model.rs

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::dag::{FlowBlock, FlowSpec, JobTemplate, TemplateGraph};
use crate::exec::SimulationPlan;
use crate::types::{JobPriority, SchedulerSettings};

/// Job file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// max_number_of_execution = 2
///
/// [job]
/// name = "demo"
///
/// [task.A]
/// command = "echo A"
///
/// [task.B]
/// after = ["A"]
/// ```
///
/// Only `[job]` is required; `[config]` and `[simulation]` fall back to
/// defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawJobFile {
    /// Scheduler-wide settings from `[config]`.
    #[serde(default)]
    pub config: SchedulerSettings,

    pub job: JobSection,

    /// All tasks from `[task.<name>]`, in file order.
    #[serde(default)]
    pub task: IndexMap<String, TaskConfig>,

    /// Decisions used when the job is run against the simulated executor.
    #[serde(default)]
    pub simulation: SimulationPlan,
}

/// `[job]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSection {
    pub name: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub generic_information: BTreeMap<String, String>,
    /// Overrides `[config].cancel_job_on_error` for this job.
    #[serde(default)]
    pub cancel_job_on_error: Option<bool>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// `"native"` (default), `"java"` or `"script"`.
    #[serde(default = "default_kind")]
    pub kind: String,

    /// Command line for native tasks.
    #[serde(default)]
    pub command: Option<String>,

    /// Executable class for java tasks.
    #[serde(default)]
    pub class_name: Option<String>,

    /// Script language and source for script tasks.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub source: Option<String>,

    /// Dependency list: this task waits for all tasks listed here.
    #[serde(default)]
    pub after: Vec<String>,

    #[serde(default)]
    pub precious_result: bool,

    #[serde(default)]
    pub resources: Option<u32>,

    #[serde(default)]
    pub max_number_of_execution: Option<u32>,
    #[serde(default)]
    pub max_number_of_execution_on_failure: Option<u32>,

    #[serde(default)]
    pub block: FlowBlock,
    #[serde(default)]
    pub matching_block: Option<String>,

    /// `[task.<name>.flow]` sub-table.
    #[serde(default)]
    pub flow: Option<FlowSpec>,
}

fn default_kind() -> String {
    "native".to_string()
}

/// Validated job file.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub settings: SchedulerSettings,
    pub template: JobTemplate,
    /// Template graph including implicit IF edges.
    pub graph: TemplateGraph,
    pub simulation: SimulationPlan,
}
