// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::ids::JobId;

#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Structural violation when inserting into a task graph
    /// (duplicate id, self-loop).
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    /// Internal bookkeeping diverged from reality. Always a defect upstream.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid flow action on task '{task}': {reason}")]
    InvalidFlowAction { task: String, reason: String },

    /// A flow block or flow declaration in a job template is malformed.
    #[error("Invalid flow definition on task '{task}': {reason}")]
    InvalidFlowDefinition { task: String, reason: String },

    #[error("Cycle detected in job graph: {0}")]
    CyclicDependency(String),

    #[error("Task '{task}' references unknown task '{reference}'")]
    UnknownTaskReference { task: String, reference: String },

    #[error("Result already recorded for task '{0}'")]
    DuplicateResult(String),

    /// Task completions are refused until running tasks have been restored
    /// after a recovery.
    #[error("Scheduler is recovering; running tasks have not been restored yet")]
    NotReady,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedulerError {
    pub(crate) fn invalid_flow(task: impl ToString, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidFlowAction {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_definition(task: impl ToString, reason: impl Into<String>) -> Self {
        SchedulerError::InvalidFlowDefinition {
            task: task.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error signals an internal consistency defect.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidState(_) | SchedulerError::DuplicateResult(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedulerError>;
