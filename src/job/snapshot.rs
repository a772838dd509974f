// src/job/snapshot.rs

//! Serialisable image of a job, used to reload graphs after a crash.

use serde::{Deserialize, Serialize};

use crate::dag::{JobTemplate, TaskState};
use crate::ids::{JobId, TaskId};
use crate::job::result::TaskResult;
use crate::job::status::JobStatus;
use crate::types::JobPriority;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub parents: Vec<TaskId>,
    pub state: TaskState,
    pub attempts: u32,
    pub executions_left: u32,
    pub failure_executions_left: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job: JobId,
    pub template: JobTemplate,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub paused_from: Option<JobStatus>,
    pub cancel_job_on_error: bool,
    /// Live tasks in arena order.
    pub tasks: Vec<TaskSnapshot>,
    /// Ids pruned from the live graph.
    pub retired: Vec<TaskId>,
    pub results: Vec<(String, TaskResult)>,
    pub skipped: Vec<TaskId>,
}

impl JobSnapshot {
    pub fn to_json(&self) -> crate::errors::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> crate::errors::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Tasks that were running when the snapshot was taken.
    pub fn running_tasks(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Running)
            .map(|t| &t.id)
    }
}
